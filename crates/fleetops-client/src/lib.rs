//! fleetops-client: HTTP client for the directory service
//!
//! Thin typed wrapper over the REST endpoints the orchestrator needs:
//! deploy-target lookup, app record sync, deployment records, node group
//! and node management.
//!
//! ```no_run
//! use fleetops_client::HttpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new("https://api.ops.autos")?.with_token("ops_xxx");
//! let targets = client.deploy_targets(Some("my-saas"), "api").await?;
//! println!("{} nodes bound", targets.targets.len());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod http;

pub use error::{ClientError, Result};
pub use http::HttpClient;
