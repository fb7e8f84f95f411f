use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub channels: ChannelsConfig,
    pub store: StoreConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelsConfig {
    pub text_url: String,
    pub tts_url: Option<String>,
    pub upload_url: String,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub chunk_ms: u32,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
