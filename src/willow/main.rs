// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

// Willow keeps the route network graph topologically valid: it watches the
// raw geometry edit stream, classifies every edit against the reconciled
// network, applies the structural consequence, and publishes the domain
// events downstream consumers subscribe to.

use routenet::config::Settings;
use routenet::integrator::classifier::Classifier;
use routenet::integrator::dispatch::Dispatcher;
use routenet::integrator::mutator::TopologyMutator;
use routenet::store::{GeoDatabase, Postgis};
use routenet::stream::{KafkaEventProducer, RouteNetworkSubscriber};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();
    info!(
        application_name = %settings.application.application_name,
        tolerance = settings.application.tolerance,
        "starting route network integrator"
    );

    let pool = PgPoolOptions::new()
        .max_connections(settings.postgis.max_connections)
        .connect(&settings.postgis.database_url)
        .await?;
    let db: Arc<dyn GeoDatabase> = Arc::new(Postgis::new(pool, &settings.application));

    let publisher = Arc::new(KafkaEventProducer::new(&settings.kafka)?);
    let classifier = Classifier::new(db.clone(), settings.application.clone());
    let mutator = TopologyMutator::new(db, settings.application.clone());
    let dispatcher = Dispatcher::new(mutator, publisher);
    let subscriber = RouteNetworkSubscriber::new(&settings.kafka, classifier, dispatcher)?;

    // the consumer and producer are dropped, and their connections closed,
    // on every exit path of this select
    tokio::select! {
        result = subscriber.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping");
        }
    }

    Ok(())
}
