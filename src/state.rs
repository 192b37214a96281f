use crate::config::Config;
use crate::docs::AnnotationStore;

pub struct AppState {
    pub store: AnnotationStore,
    pub config: Config,
}

impl AppState {
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let store = AnnotationStore::open(&config).await?;
        Ok(Self { store, config })
    }
}
