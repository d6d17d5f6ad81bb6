//! minikube
//!
//! Runs a single-node Kubernetes cluster inside one local VM. The crate manages
//! the VM's lifecycle across several hypervisor backends, provisions its TLS
//! credentials, pushes the control-plane binary and add-ons, starts the control
//! plane, and resolves service URLs once the cluster is up.
//!
//! # Example
//!
//! ```no_run
//! use minikube::{
//!     bootstrap, certs, constants, AssetCache, BuiltinDrivers, FileHostStore, HostManager,
//!     KubernetesConfig, MachineConfig, Settings, START_HOST_POLICY,
//! };
//!
//! let home = constants::minipath();
//! let store = FileHostStore::in_home(&home);
//! let drivers = BuiltinDrivers::new(store.root());
//! let cache = AssetCache::in_home(&home);
//! let manager = HostManager::new(&home, &store, &drivers, &cache);
//!
//! let machine = MachineConfig::builder().vm_driver("kvm").memory_mb(4096).build();
//! manager.ensure_started_with_retry(&machine, START_HOST_POLICY)?;
//!
//! let driver = manager.driver()?;
//! certs::setup_certs(driver.as_ref(), &home)?;
//!
//! let settings = Settings::load(Settings::default_path(&home))?;
//! let k8s = KubernetesConfig::builder().node_ip(driver.ip()?).build();
//! bootstrap::update_cluster(driver.as_ref(), &k8s, &bootstrap::ClusterAssets::new(&home, &settings, &cache))?;
//! bootstrap::start_cluster(driver.as_ref(), &k8s)?;
//! # Ok::<(), minikube::Error>(())
//! ```

pub mod assets;
pub mod bootstrap;
pub mod cache;
pub mod certs;
pub mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod host;
pub mod models;
pub mod prompt;
pub mod provision;
pub mod retry;
pub mod service;
pub mod ssh;
pub mod store;
pub mod template;

pub use cache::AssetCache;
pub use config::{ExtraOption, KubernetesConfig, MachineConfig, Settings};
pub use driver::{BuiltinDrivers, Driver, DriverFactory, DriverKind};
pub use error::{Error, MultiError, Result, ResultExt};
pub use host::{ExitRequest, HostManager, START_HOST_POLICY};
pub use models::{Host, PowerState};
pub use retry::{retry_after, RetryPolicy};
pub use service::{ClusterApi, KubeClusterApi, ServiceResolver, ServiceUrl, ServiceUrls};
pub use store::{FileHostStore, HostStore, MemoryHostStore};
pub use template::UrlTemplate;
