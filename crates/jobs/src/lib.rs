//! Background job orchestration for the control plane: the priority queue,
//! the worker pool, tenant job handlers, request-side lifecycle operations,
//! notifications, and periodic maintenance.

pub mod handlers;
pub mod lifecycle;
pub mod maintenance;
pub mod notify;
pub mod queue;
pub mod worker;

pub use handlers::{JobError, TenantJobs};
pub use lifecycle::{LifecycleError, TenantLifecycle};
pub use maintenance::Maintenance;
pub use notify::{CapturingNotifier, Notifier, TracingNotifier};
pub use queue::JobQueue;
pub use worker::{JobExecutor, WorkerPool};
