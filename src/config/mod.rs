mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use ini::{Ini, Properties};
use std::collections::HashSet;
use std::env;
use std::path::Path;

impl Config {
    /// Load the INI-style configuration file and apply environment-variable
    /// overrides (see §6 of the spec) before validating.
    pub fn load(path: &Path) -> Result<Self> {
        let ini = Ini::load_from_file(path)
            .with_context(|| format!("failed to read config file: {:?}", path))?;

        let mut config =
            Self::from_ini(&ini).with_context(|| "failed to parse config file")?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let main_section = ini
            .section(Some("main"))
            .context("missing required [main] section")?;

        let main = MainConfig {
            stream_uri: required(main_section, "streamUri")?,
            base_uri: required(main_section, "baseUri")?,
            exit_on_error: get_bool(main_section, "exitOnError", false),
            ignore_connection_errors: get_bool(main_section, "ignoreConnectionErrors", false),
            port: get_num(main_section, "port", default_port())?,
            heartbeat_interval_secs: get_num(
                main_section,
                "heartbeatIntervalSecs",
                default_heartbeat_secs(),
            )?,
            init_timeout_secs: get_num(
                main_section,
                "initTimeoutSecs",
                default_init_timeout_secs(),
            )?,
        };

        let events = match ini.section(Some("events")) {
            Some(section) => EventsConfig {
                events_uri: section.get("eventsUri").map(str::to_string),
                send_events: get_bool(section, "sendEvents", false),
                flush_interval_secs: get_num(section, "flushIntervalSecs", 5)?,
                sampling_interval: get_num(section, "samplingInterval", 0)?,
                capacity: get_num(section, "capacity", 1000)?,
            },
            None => EventsConfig::default(),
        };

        let redis = match ini.section(Some("redis")) {
            Some(section) => Some(RedisConfig {
                host: required(section, "host")?,
                port: get_num(section, "port", 6379)?,
                local_ttl_ms: get_num(section, "localTtl", 30_000)?,
            }),
            None => None,
        };

        let mut environments = Vec::new();
        for (name, section) in ini.iter() {
            let Some(env_name) = name.and_then(parse_environment_section_name) else {
                continue;
            };
            environments.push(EnvironmentConfig {
                name: env_name.to_string(),
                api_key: required(section, "apiKey")?,
                mobile_key: section.get("mobileKey").map(str::to_string),
                env_id: section.get("envId").map(str::to_string),
                prefix: section.get("prefix").map(str::to_string),
            });
        }

        Ok(Config {
            main,
            events,
            redis,
            environments,
        })
    }

    /// `LD_ENV_<name>` / `LD_PREFIX_<name>` / `USE_REDIS` / `REDIS_*` — the
    /// container-friendly override layer described in §6.
    fn apply_env_overrides(&mut self) {
        for (key, value) in env::vars() {
            if let Some(name) = key.strip_prefix("LD_ENV_") {
                self.environment_mut(name).api_key = value;
            } else if let Some(name) = key.strip_prefix("LD_PREFIX_") {
                self.environment_mut(name).prefix = Some(value);
            }
        }

        let use_redis = env::var("USE_REDIS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if !use_redis {
            return;
        }

        let mut redis = self.redis.take().unwrap_or(RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            local_ttl_ms: 30_000,
        });

        if let Ok(value) = env::var("REDIS_HOST") {
            let (host, port) = parse_container_link(&value);
            if !host.is_empty() {
                redis.host = host;
            }
            if let Some(port) = port {
                redis.port = port;
            }
        }

        if let Ok(value) = env::var("REDIS_PORT") {
            let (host, port) = parse_container_link(&value);
            if let Some(port) = port {
                redis.port = port;
            }
            if !host.is_empty() {
                redis.host = host;
            }
        }

        if let Ok(value) = env::var("REDIS_TTL") {
            if let Ok(ttl) = value.parse() {
                redis.local_ttl_ms = ttl;
            }
        }

        self.redis = Some(redis);
    }

    fn environment_mut(&mut self, name: &str) -> &mut EnvironmentConfig {
        if let Some(pos) = self.environments.iter().position(|e| e.name == name) {
            &mut self.environments[pos]
        } else {
            self.environments.push(EnvironmentConfig {
                name: name.to_string(),
                api_key: String::new(),
                mobile_key: None,
                env_id: None,
                prefix: None,
            });
            self.environments.last_mut().expect("just pushed")
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.environments.is_empty() {
            bail!("at least one [environment \"name\"] section must be configured");
        }

        let mut server_keys = HashSet::new();
        let mut mobile_keys = HashSet::new();
        let mut env_ids = HashSet::new();

        for env in &self.environments {
            if env.api_key.is_empty() {
                bail!("environment '{}' is missing a required apiKey", env.name);
            }
            if !server_keys.insert(env.api_key.clone()) {
                bail!("duplicate server key across environments: '{}'", env.api_key);
            }
            if let Some(mobile) = &env.mobile_key {
                if !mobile_keys.insert(mobile.clone()) {
                    bail!("duplicate mobile key across environments: '{}'", mobile);
                }
            }
            if let Some(id) = &env.env_id {
                if !env_ids.insert(id.clone()) {
                    bail!("duplicate envId across environments: '{}'", id);
                }
            }
        }

        if self.main.stream_uri.is_empty() || self.main.base_uri.is_empty() {
            bail!("[main] streamUri and baseUri are required");
        }

        Ok(())
    }
}

fn parse_environment_section_name(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("environment")?.trim_start();
    rest.strip_prefix('"')?.strip_suffix('"')
}

fn required(section: &Properties, key: &str) -> Result<String> {
    section
        .get(key)
        .map(str::to_string)
        .with_context(|| format!("missing required key '{}'", key))
}

fn get_bool(section: &Properties, key: &str, default: bool) -> bool {
    section
        .get(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn get_num<T: std::str::FromStr>(section: &Properties, key: &str, default: T) -> Result<T> {
    match section.get(key) {
        Some(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid numeric value for '{}': '{}'", key, v)),
        None => Ok(default),
    }
}

/// Docker legacy-link values look like `tcp://172.17.0.2:6379`; plain values
/// are a bare host or a bare port.
fn parse_container_link(value: &str) -> (String, Option<u16>) {
    if let Some(rest) = value.strip_prefix("tcp://") {
        if let Some((host, port)) = rest.rsplit_once(':') {
            if let Ok(port) = port.parse() {
                return (host.to_string(), Some(port));
            }
        }
        return (rest.to_string(), None);
    }

    if let Ok(port) = value.parse() {
        return (String::new(), Some(port));
    }

    (value.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_ini(contents: &str) -> tempfile_path::TempIni {
        tempfile_path::TempIni::new(contents)
    }

    mod tempfile_path {
        use std::io::Write;
        use std::path::PathBuf;

        pub struct TempIni {
            pub path: PathBuf,
        }

        impl TempIni {
            pub fn new(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("flag-relay-test-{}.ini", uuid::Uuid::new_v4()));
                let mut file = std::fs::File::create(&path).unwrap();
                file.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }

        impl Drop for TempIni {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    const BASIC: &str = r#"
[main]
streamUri = https://stream.example.com
baseUri = https://sdk.example.com

[environment "production"]
apiKey = sdk-A
mobileKey = mob-A
envId = env-A
"#;

    #[test]
    fn parses_basic_config() {
        let tmp = write_temp_ini(BASIC);
        let config = Config::load(&tmp.path).unwrap();

        assert_eq!(config.main.stream_uri, "https://stream.example.com");
        assert_eq!(config.environments.len(), 1);
        assert_eq!(config.environments[0].api_key, "sdk-A");
        assert_eq!(config.environments[0].name, "production");
        assert_eq!(config.main.port, 8030);
    }

    #[test]
    fn rejects_missing_environments() {
        let tmp = write_temp_ini(
            "[main]\nstreamUri = https://stream.example.com\nbaseUri = https://sdk.example.com\n",
        );
        assert!(Config::load(&tmp.path).is_err());
    }

    #[test]
    fn rejects_duplicate_server_keys() {
        let tmp = write_temp_ini(
            r#"
[main]
streamUri = https://stream.example.com
baseUri = https://sdk.example.com

[environment "a"]
apiKey = dup

[environment "b"]
apiKey = dup
"#,
        );
        assert!(Config::load(&tmp.path).is_err());
    }

    #[test]
    fn parses_container_link_style_redis_port() {
        assert_eq!(
            parse_container_link("tcp://172.17.0.5:6380"),
            ("172.17.0.5".to_string(), Some(6380))
        );
        assert_eq!(parse_container_link("6380"), (String::new(), Some(6380)));
        assert_eq!(
            parse_container_link("redis-host"),
            ("redis-host".to_string(), None)
        );
    }
}
