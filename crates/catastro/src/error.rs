use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatastroError {
    #[error("Search error: {0}")]
    Search(#[from] crate::search::SearchError),
    #[error("Remote error: {0}")]
    Remote(#[from] catastro_source::RemoteError),
    #[error("Geometry error: {0}")]
    Geometry(#[from] catastro_source::GeometryError),
    #[error("Init Logging error: {0}")]
    InitLogging(#[from] tracing_subscriber::filter::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CatastroError>;
