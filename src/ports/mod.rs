pub mod http_client;
pub mod mountable;

pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use mountable::{MountError, Mountable};
