use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_oracle_roles, parse_u16,
    parse_u32, parse_u64,
};
use super::types::{
    ConfigError, DatabaseSettings, LifecycleSettings, RedisSettings, RoleOracleSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EXAM_LIFECYCLE_HOST", "0.0.0.0");
        let port = env_or_default("EXAM_LIFECYCLE_PORT", "8000");

        let environment = parse_environment(
            env_optional("EXAM_LIFECYCLE_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("EXAM_LIFECYCLE_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "exams");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "exam_lifecycle");
        let database_url = env_optional("DATABASE_URL");

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let sweep_interval_seconds = parse_u64(
            "LIFECYCLE_SWEEP_INTERVAL_SECONDS",
            env_or_default("LIFECYCLE_SWEEP_INTERVAL_SECONDS", "30"),
        )?;
        let retry_attempts = parse_u32(
            "LIFECYCLE_RETRY_ATTEMPTS",
            env_or_default("LIFECYCLE_RETRY_ATTEMPTS", "5"),
        )?;
        let retry_base_delay_ms = parse_u64(
            "LIFECYCLE_RETRY_BASE_DELAY_MS",
            env_or_default("LIFECYCLE_RETRY_BASE_DELAY_MS", "200"),
        )?;

        let oracle_base_url = env_or_default("ROLE_ORACLE_BASE_URL", "");
        let oracle_api_token = env_or_default("ROLE_ORACLE_API_TOKEN", "");
        let oracle_timeout_seconds = parse_u64(
            "ROLE_ORACLE_TIMEOUT_SECONDS",
            env_or_default("ROLE_ORACLE_TIMEOUT_SECONDS", "10"),
        )?;
        let oracle_cache_ttl_seconds = parse_u64(
            "ROLE_ORACLE_CACHE_TTL_SECONDS",
            env_or_default("ROLE_ORACLE_CACHE_TTL_SECONDS", "300"),
        )?;
        let oracle_roles = parse_oracle_roles(env_optional("ROLE_ORACLE_ROLES"));

        let log_level = env_or_default("EXAM_LIFECYCLE_LOG_LEVEL", "info");
        let json = env_optional("EXAM_LIFECYCLE_LOG_JSON")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            lifecycle: LifecycleSettings {
                sweep_interval_seconds,
                retry_attempts,
                retry_base_delay_ms,
            },
            role_oracle: RoleOracleSettings {
                base_url: oracle_base_url,
                api_token: oracle_api_token,
                timeout_seconds: oracle_timeout_seconds,
                cache_ttl_seconds: oracle_cache_ttl_seconds,
                roles: oracle_roles,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn lifecycle(&self) -> &LifecycleSettings {
        &self.lifecycle
    }

    pub(crate) fn role_oracle(&self) -> &RoleOracleSettings {
        &self.role_oracle
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lifecycle.sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "LIFECYCLE_SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.lifecycle.retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "LIFECYCLE_RETRY_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if self.role_oracle.roles.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ROLE_ORACLE_ROLES",
                value: String::from("<empty>"),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.role_oracle.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("ROLE_ORACLE_BASE_URL"));
        }
        if self.role_oracle.api_token.is_empty() {
            return Err(ConfigError::MissingSecret("ROLE_ORACLE_API_TOKEN"));
        }

        Ok(())
    }
}
