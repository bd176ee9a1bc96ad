#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("input shape: {0}")]
    InputShape(String),
    #[error("{source}")]
    Geometry {
        #[from]
        source: retrocap_mvg::GeometryError,
    },
    #[error("{source}")]
    BundleAdjustment {
        #[from]
        source: retrocap_bundle_adj::Error,
    },
    #[error("{source}")]
    Mode {
        #[from]
        source: retrocap_types::ModeError,
    },
    #[error("numeric failure: {0}")]
    Numeric(&'static str),
    #[error("device failure: {0}")]
    Device(String),
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
    #[error("{source}")]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },
}
