//! execgate - exec-call interception for sandboxed processes
//!
//! This library is preloaded into sandboxed processes (`LD_PRELOAD`) and
//! interposes the exec family. Every attempt to replace the process image is
//! split, per policy, into an allowed and a forbidden half: the forbidden
//! half is signalled to an out-of-process supervisor by attempting a fake
//! exec below a sentinel prefix, the allowed half is then executed for real.
//! A call with nothing allowed fails with `EACCES`, mimicking the kernel.
//!
//! # Overview
//!
//! The policy engine combines:
//! - symlink-aware path canonicalization with cycle detection ([`canonical`]);
//! - search-path lookup for bare program names ([`resolve`]);
//! - three newline-separated policy lists, cached per file mtime
//!   ([`policy::cache`]);
//! - an association registry grouping an application's helper binaries under
//!   one main identity ([`assoc`]);
//! - the per-call decision engine and dispatch protocol ([`decision`],
//!   [`dispatch`]).
//!
//! The interposed C symbols live in [`preload`]; everything else is callable
//! directly, which is how the test suite replays exec scenarios against a
//! recording [`dispatch::ImageReplacer`].
//!
//! # Enforcement model
//!
//! Nothing here *enforces* policy: a non-cooperating process can bypass the
//! preload entirely. The library makes a cooperating process self-censor so
//! that no kernel-level syscall filtering is needed; detecting bypass is the
//! supervisor's job.

pub mod assoc;
pub mod canonical;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod intercept;
pub mod policy;
pub mod preload;
pub mod resolve;
mod trace;

pub use assoc::AssociationRegistry;
pub use canonical::{canonicalize, realpath, CanonFlags};
pub use decision::{decide, ExecCall, ExecutionPlan};
pub use dispatch::{dispatch, AllowedVia, ImageReplacer, RealExec, SENTINEL_PREFIX};
pub use error::{ExecGateError, Result};
pub use policy::{ExecPolicy, PolicyPaths};
pub use resolve::resolve;
pub use trace::LOG_ENV;
