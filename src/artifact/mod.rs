pub mod fetch;
pub mod signer;

pub use fetch::{ArtifactFetcher, FetchError, HttpFetcher};
pub use signer::{SignerError, TopicUrlSigner, UrlSigner};
