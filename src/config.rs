// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use std::env;

/// Settings for the integrator worker, read once at startup from the
/// environment (a `.env` file is honoured via dotenvy in the binary).
#[derive(Debug, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub postgis: PostgisSettings,
    pub kafka: KafkaSettings,
}

/// Identity and tolerance of this application. The application name is
/// stamped on every row the integrator writes, so its own edits can be
/// recognised when they echo back on the edit stream.
#[derive(Debug, Clone)]
pub struct ApplicationSettings {
    pub application_name: String,
    /// Linear distance below which two coordinates are the same point.
    pub tolerance: f64,
}

#[derive(Debug, Clone)]
pub struct PostgisSettings {
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: String,
    pub consumer_group: String,
    pub route_node_topic: String,
    pub route_segment_topic: String,
    pub event_topic: String,
}

impl Settings {
    pub fn from_env() -> Settings {
        Settings {
            application: ApplicationSettings {
                application_name: env_or("APPLICATION_NAME", "GDB_INTEGRATOR"),
                tolerance: env_or("TOLERANCE", "0.01")
                    .parse()
                    .expect("TOLERANCE must be a number"),
            },
            postgis: PostgisSettings {
                database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", "16")
                    .parse()
                    .expect("DATABASE_MAX_CONNECTIONS must be a number"),
            },
            kafka: KafkaSettings {
                brokers: env_or("KAFKA_BROKERS", "localhost:9092"),
                consumer_group: env_or("KAFKA_CONSUMER_GROUP", "routenet-integrator"),
                route_node_topic: env_or("KAFKA_ROUTE_NODE_TOPIC", "postgres.route_network.route_node"),
                route_segment_topic: env_or(
                    "KAFKA_ROUTE_SEGMENT_TOPIC",
                    "postgres.route_network.route_segment",
                ),
                event_topic: env_or("KAFKA_EVENT_TOPIC", "domain.route_network"),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default() {
        assert_eq!(env_or("ROUTENET_DOES_NOT_EXIST", "fallback"), "fallback");
    }
}
