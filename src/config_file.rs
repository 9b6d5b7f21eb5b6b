//! Config loading: YAML read, default materialization on absence
//! (atomic `.tmp` + rename), and user-defined-source validation
//! (spec.md §6, §4.2).

use pool_core::config::ResolvedConfig;
use pool_core::error::PoolError;
use std::path::Path;

pub async fn load_or_materialize(path: &Path) -> Result<ResolvedConfig, PoolError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let default = ResolvedConfig::default();
            write_default(path, &default).await?;
            return Ok(default);
        }
        Err(e) => return Err(e.into()),
    };

    let config: ResolvedConfig = serde_yaml::from_str(&contents).map_err(|e| PoolError::ConfigInvalid {
        source: path.display().to_string(),
        reason: e.to_string(),
    })?;

    validate(&config)?;
    Ok(config)
}

async fn write_default(path: &Path, config: &ResolvedConfig) -> Result<(), PoolError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let yaml = serde_yaml::to_string(config).map_err(|e| PoolError::ConfigInvalid {
        source: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "config.yaml".into());
    tmp_name.push(".tmp");
    let tmp_path = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(tmp_name),
        _ => std::path::PathBuf::from(tmp_name),
    };
    tokio::fs::write(&tmp_path, yaml).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn validate(config: &ResolvedConfig) -> Result<(), PoolError> {
    for custom in &config.sources.customs {
        custom.validate().map_err(|reason| PoolError::ConfigInvalid {
            source: custom.name.clone(),
            reason,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_config_materializes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let config = load_or_materialize(&path).await.unwrap();
        assert_eq!(config.listener.port, 1080);
        assert!(tokio::fs::metadata(&path).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_custom_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(
            &path,
            r#"
sourcesConfig:
  customs:
    - name: acme
      endpoint: "https://acme.example/list"
      responseType: text
      enablePaging: true
"#,
        )
        .await
        .unwrap();

        let err = load_or_materialize(&path).await.unwrap_err();
        assert!(matches!(err, PoolError::ConfigInvalid { .. }));
    }
}
