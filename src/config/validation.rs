use crate::config::types::{Config, CrawlerConfig, HttpConfig, OutputConfig, SiteConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_http_config(&config.http)?;
    validate_site_config(&config.site)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 32 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 32, got {}",
            config.workers
        )));
    }

    if config.page_size < 1 {
        return Err(ConfigError::Validation(format!(
            "page_size must be >= 1, got {}",
            config.page_size
        )));
    }

    if config.max_listing_failures < 1 {
        return Err(ConfigError::Validation(format!(
            "max_listing_failures must be >= 1, got {}",
            config.max_listing_failures
        )));
    }

    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_ms == 0 || config.download_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "request and download timeouts must be greater than 0".to_string(),
        ));
    }

    if config.chunk_size < 512 {
        return Err(ConfigError::Validation(format!(
            "chunk_size must be >= 512 bytes, got {}",
            config.chunk_size
        )));
    }

    Ok(())
}

fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            base.scheme()
        )));
    }

    if base.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url '{}' has no host",
            config.base_url
        )));
    }

    if config.tags.trim().is_empty() {
        return Err(ConfigError::Validation("tags cannot be empty".to_string()));
    }

    if let Some(host) = &config.canonical_media_host {
        validate_domain_string(host)?;
    }

    if !config.media_host_aliases.is_empty() && config.canonical_media_host.is_none() {
        return Err(ConfigError::Validation(
            "media_host_aliases requires canonical_media_host".to_string(),
        ));
    }

    for pattern in config
        .media_host_aliases
        .iter()
        .chain(config.denied_hosts.iter())
    {
        validate_domain_pattern(pattern)?;
    }

    if config.media_extensions.is_empty() {
        return Err(ConfigError::Validation(
            "media_extensions must list at least one extension".to_string(),
        ));
    }

    for ext in &config.media_extensions {
        if ext.is_empty() || ext.starts_with('.') || !ext.chars().all(|c| c.is_alphanumeric()) {
            return Err(ConfigError::Validation(format!(
                "media extension '{}' must be alphanumeric without a leading dot",
                ext
            )));
        }
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.download_dir.is_empty() {
        return Err(ConfigError::Validation(
            "download_dir cannot be empty".to_string(),
        ));
    }

    if config.processed_file.is_empty()
        || config.fetched_file.is_empty()
        || config.results_file.is_empty()
    {
        return Err(ConfigError::Validation(
            "state file names cannot be empty".to_string(),
        ));
    }

    if config.processed_file == config.fetched_file {
        return Err(ConfigError::Validation(format!(
            "processed_file and fetched_file must differ, both are '{}'",
            config.processed_file
        )));
    }

    if config.results_file == config.processed_file || config.results_file == config.fetched_file {
        return Err(ConfigError::Validation(format!(
            "results_file '{}' would overwrite a state document",
            config.results_file
        )));
    }

    Ok(())
}

/// Validates a host pattern (supports a leading "*." wildcard)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Host pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a host string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern("Host cannot be empty".to_string()));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' must contain at least one dot",
            domain
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    const BASE: &str = r#"
[site]
base-url = "https://booru.example"
tags = "alpha"
"#;

    #[test]
    fn test_validate_domain_pattern() {
        assert!(validate_domain_pattern("booru.example").is_ok());
        assert!(validate_domain_pattern("*.booru.example").is_ok());
        assert!(validate_domain_pattern("127.0.0.1").is_ok());

        assert!(validate_domain_pattern("").is_err());
        assert!(validate_domain_pattern("*.").is_err());
        assert!(validate_domain_pattern("localhost").is_err());
        assert!(validate_domain_pattern(".booru.example").is_err());
        assert!(validate_domain_pattern("booru..example").is_err());
        assert!(validate_domain_pattern("booru.example/path").is_err());
    }

    #[test]
    fn test_minimal_config_is_valid() {
        assert!(parse_config(BASE).is_ok());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let content = "[site]\nbase-url = \"ftp://booru.example\"\ntags = \"alpha\"\n";
        assert!(matches!(
            parse_config(content),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_rejects_blank_tags() {
        let content = "[site]\nbase-url = \"https://booru.example\"\ntags = \"   \"\n";
        assert!(matches!(
            parse_config(content),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_aliases_without_canonical_host() {
        let content = format!("{}media-host-aliases = [\"*.booru.example\"]\n", BASE);
        assert!(matches!(
            parse_config(&content),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_dotted_media_extension() {
        let content = format!("{}media-extensions = [\".mp4\"]\n", BASE);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_rejects_tiny_chunk_size() {
        let content = format!("[http]\nchunk-size = 16\n{}", BASE);
        assert!(matches!(
            parse_config(&content),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_identical_state_files() {
        let content = format!(
            "{}\n[output]\nprocessed-file = \"state.json\"\nfetched-file = \"state.json\"\n",
            BASE
        );
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_rejects_results_file_over_state_file() {
        let content = format!(
            "{}\n[output]\nresults-file = \"fetched-assets.json\"\n",
            BASE
        );
        assert!(matches!(
            parse_config(&content),
            Err(ConfigError::Validation(_))
        ));
    }
}
