use altegio_bot::config::Config;
use std::env;
use std::sync::Mutex;
use std::time::Duration;

// Mutex to ensure config tests run sequentially to avoid environment variable conflicts
static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

fn set_required_vars() {
    env::set_var("ALTEGIO_PARTNER_TOKEN", "partner_token_123");
    env::set_var("ALTEGIO_USER_TOKEN", "user_token_456");
    env::set_var("ALTEGIO_COMPANY_ID", "307626");
    env::set_var("WEBHOOK_SECRET", "hook_secret");
}

fn clear_all_vars() {
    for name in [
        "ALTEGIO_PARTNER_TOKEN",
        "ALTEGIO_USER_TOKEN",
        "ALTEGIO_COMPANY_ID",
        "WEBHOOK_SECRET",
        "ALTEGIO_API_BASE_URL",
        "DATABASE_URL",
        "HTTP_PORT",
        "SLOT_CACHE_TTL_SECS",
        "SESSION_EXPIRY_SECS",
        "COMMIT_MAX_ATTEMPTS",
        "COMMIT_RETRY_BASE_DELAY_MS",
        "ALTEGIO_RETRY_MAX_ATTEMPTS",
        "ALTEGIO_RETRY_BASE_DELAY_MS",
    ] {
        env::remove_var(name);
    }
}

#[test]
fn test_config_from_env_with_all_vars() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_all_vars();
    set_required_vars();

    env::set_var("DATABASE_URL", "sqlite:test.db");
    env::set_var("HTTP_PORT", "8080");
    env::set_var("ALTEGIO_API_BASE_URL", "https://api.example.test/api/v1");
    env::set_var("SLOT_CACHE_TTL_SECS", "60");
    env::set_var("SESSION_EXPIRY_SECS", "900");
    env::set_var("COMMIT_MAX_ATTEMPTS", "5");
    env::set_var("COMMIT_RETRY_BASE_DELAY_MS", "500");
    env::set_var("ALTEGIO_RETRY_MAX_ATTEMPTS", "4");
    env::set_var("ALTEGIO_RETRY_BASE_DELAY_MS", "250");

    let config = Config::from_env().unwrap();

    assert_eq!(config.altegio_partner_token, "partner_token_123");
    assert_eq!(config.altegio_user_token, "user_token_456");
    assert_eq!(config.company_id, 307626);
    assert_eq!(config.webhook_secret, "hook_secret");
    assert_eq!(config.database_url, "sqlite:test.db");
    assert_eq!(config.http_port, 8080);
    assert_eq!(config.altegio_api_base_url, "https://api.example.test/api/v1");
    assert_eq!(config.slot_cache_ttl, Duration::from_secs(60));
    assert_eq!(config.session_expiry, Duration::from_secs(900));
    assert_eq!(config.commit_max_attempts, 5);
    assert_eq!(config.retry_base_delay, Duration::from_millis(500));
    assert_eq!(config.remote_retry_max_attempts, 4);
    assert_eq!(config.remote_retry_base_delay, Duration::from_millis(250));

    clear_all_vars();
}

#[test]
fn test_config_from_env_with_defaults() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_all_vars();
    set_required_vars();

    let config = Config::from_env().unwrap();

    assert_eq!(config.database_url, "sqlite:./data/altegio_bot.db");
    assert_eq!(config.http_port, 8000);
    assert_eq!(config.altegio_api_base_url, "https://api.alteg.io/api/v1");
    assert_eq!(config.slot_cache_ttl, Duration::from_secs(120));
    assert_eq!(config.session_expiry, Duration::from_secs(1800));
    assert_eq!(config.commit_max_attempts, 3);
    assert_eq!(config.retry_base_delay, Duration::from_millis(2000));
    assert_eq!(config.remote_retry_max_attempts, 2);
    assert_eq!(config.remote_retry_base_delay, Duration::from_millis(300));

    clear_all_vars();
}

#[test]
fn test_config_missing_required_tokens() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_all_vars();

    let result = Config::from_env();
    assert!(result.is_err());

    let error_msg = result.unwrap_err().to_string();
    assert!(error_msg.contains("ALTEGIO_PARTNER_TOKEN must be set"));

    clear_all_vars();
}

#[test]
fn test_config_rejects_blank_secret() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_all_vars();
    set_required_vars();
    env::set_var("WEBHOOK_SECRET", "   ");

    let result = Config::from_env();
    assert!(result.is_err());

    clear_all_vars();
}

#[test]
fn test_config_invalid_port() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_all_vars();
    set_required_vars();
    env::set_var("HTTP_PORT", "not-a-port");

    let result = Config::from_env();
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Invalid HTTP_PORT"));

    clear_all_vars();
}

#[test]
fn test_config_invalid_company_id() {
    let _guard = CONFIG_TEST_MUTEX.lock().unwrap();
    clear_all_vars();
    set_required_vars();
    env::set_var("ALTEGIO_COMPANY_ID", "abc");

    let result = Config::from_env();
    assert!(result.is_err());

    clear_all_vars();
}
