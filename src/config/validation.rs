use crate::config::types::{
    ClassifierConfig, CompanyEntry, Config, CrawlerConfig, PolicyConfig, ProbeConfig,
    StorageConfig, UserAgentConfig, MAX_WINDOW_HOURS,
};
use crate::url::normalize_url;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_policy_config(&config.policy)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;
    validate_classifier_config(&config.classifier)?;
    validate_probe_config(&config.probe)?;
    validate_companies(&config.companies)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.crawl_budget < 1 {
        return Err(ConfigError::Validation(
            "crawl_budget must be >= 1".to_string(),
        ));
    }

    if config.max_depth < 1 {
        return Err(ConfigError::Validation(
            "max_depth must be >= 1, depth 1 holds the career root".to_string(),
        ));
    }

    if config.minimum_request_interval < 10 {
        return Err(ConfigError::Validation(format!(
            "minimum_request_interval must be >= 10ms, got {}ms",
            config.minimum_request_interval
        )));
    }

    if config.fetch_timeout < 1 || config.classify_timeout < 1 {
        return Err(ConfigError::Validation(
            "fetch_timeout and classify_timeout must be >= 1s".to_string(),
        ));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.backoff_max < config.backoff_base {
        return Err(ConfigError::Validation(format!(
            "backoff_max ({}ms) must be >= backoff_base ({}ms)",
            config.backoff_max, config.backoff_base
        )));
    }

    if let Some(cooldown) = config.probe_cooldown {
        if cooldown < 1 || cooldown > MAX_WINDOW_HOURS {
            return Err(ConfigError::Validation(format!(
                "probe_cooldown must be between 1 and {} hours when set, got {}",
                MAX_WINDOW_HOURS, cooldown
            )));
        }
    }

    Ok(())
}

/// Validates the acceptance and staleness policy
fn validate_policy_config(config: &PolicyConfig) -> Result<(), ConfigError> {
    if config.acceptance_confidence > 100 {
        return Err(ConfigError::Validation(format!(
            "acceptance_confidence must be between 0 and 100, got {}",
            config.acceptance_confidence
        )));
    }

    if config.staleness_window < 1 || config.provisional_staleness_window < 1 {
        return Err(ConfigError::Validation(
            "staleness windows must be >= 1 hour".to_string(),
        ));
    }

    if config.staleness_window > MAX_WINDOW_HOURS {
        return Err(ConfigError::Validation(format!(
            "staleness_window must be <= {} hours, got {}",
            MAX_WINDOW_HOURS, config.staleness_window
        )));
    }

    if config.provisional_staleness_window > config.staleness_window {
        return Err(ConfigError::Validation(format!(
            "provisional_staleness_window ({}h) must not exceed staleness_window ({}h)",
            config.provisional_staleness_window, config.staleness_window
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // The name doubles as the robots.txt product token
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only letters, digits, '-' and '_', got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_classifier_config(config: &ClassifierConfig) -> Result<(), ConfigError> {
    if let ClassifierConfig::Chat {
        endpoint,
        model,
        api_key_env,
        max_text_chars,
        ..
    } = config
    {
        let url = Url::parse(endpoint)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid classifier endpoint: {}", e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "classifier endpoint must be http(s), got '{}'",
                endpoint
            )));
        }
        if model.is_empty() || api_key_env.is_empty() {
            return Err(ConfigError::Validation(
                "chat classifier needs a model and an api_key_env".to_string(),
            ));
        }
        if *max_text_chars == 0 {
            return Err(ConfigError::Validation(
                "max_text_chars must be >= 1".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_probe_config(config: &ProbeConfig) -> Result<(), ConfigError> {
    for path in &config.paths {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "probe path '{}' must start with '/'",
                path
            )));
        }
    }

    if config.link_keywords.is_empty() || config.page_keywords.is_empty() {
        return Err(ConfigError::Validation(
            "link_keywords and page_keywords cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the company list
fn validate_companies(companies: &[CompanyEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for company in companies {
        if company.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "company with url '{}' has an empty name",
                company.url
            )));
        }

        let url = normalize_url(&company.url, None).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid company url '{}': {}", company.url, e))
        })?;

        if !seen.insert(url.to_string()) {
            return Err(ConfigError::Validation(format!(
                "company url '{}' is listed twice",
                url
            )));
        }
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
