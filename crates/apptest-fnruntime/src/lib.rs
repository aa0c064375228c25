//! Sandboxed execution of resource functions.
//!
//! A function is a container image (or, when explicitly allowed, a host
//! executable) that reads a `ResourceList` on stdin and writes the
//! transformed list to stdout. This crate owns the invocation contract:
//!
//! - [`FunctionPermission`]: default-deny network, storage and exec grants.
//! - [`ImagePullPolicy`]: when the image is fetched.
//! - [`ContainerRuntime`]: the engine seam, with [`CliRuntime`] driving
//!   docker, podman or nerdctl.
//! - [`FunctionRunner`]: one process per invocation, stdin written while
//!   stdout and stderr drain concurrently, cancellable at any point.
//! - [`results`]: the `results.yaml` artifact written after each run.

pub mod error;
pub mod fakes;
pub mod permission;
pub mod policy;
pub mod request;
pub mod results;
pub mod runner;
pub mod runtime;

pub use error::{FnError, FnResult};
pub use permission::{FunctionPermission, MountType, StorageMount};
pub use policy::ImagePullPolicy;
pub use request::{FunctionTarget, InvocationRequest, EXEC_PREFIX};
pub use results::{FunctionResult, FunctionResultList, RESULTS_FILE_NAME};
pub use runner::{FunctionOutput, FunctionRunner};
pub use runtime::{CliRuntime, ContainerRuntime, RuntimeKind, FN_RUNTIME_ENV};
pub use tokio_util::sync::CancellationToken;
