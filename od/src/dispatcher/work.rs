//! Work and release observer seams

use std::future::Future;

use async_trait::async_trait;

use crate::instance::{Instance, InstanceSnapshot};

/// A unit of work to run against an instance
///
/// The dispatcher only decides where and when work runs; what it does with the
/// instance (network calls, retries, error handling) belongs to the caller.
#[async_trait]
pub trait Work: Send {
    async fn run(self: Box<Self>, instance: Instance);
}

#[async_trait]
impl<F, Fut> Work for F
where
    F: FnOnce(Instance) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(self: Box<Self>, instance: Instance) {
        (*self)(instance).await
    }
}

/// Notified after every release, once the registry reflects it and before the
/// backlog is drained
pub trait ReleaseObserver: Send + Sync {
    fn on_release(&self, instance: &InstanceSnapshot);
}

impl<F> ReleaseObserver for F
where
    F: Fn(&InstanceSnapshot) + Send + Sync,
{
    fn on_release(&self, instance: &InstanceSnapshot) {
        self(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceId, InstanceState};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_closure_is_work() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let work: Box<dyn Work> = Box::new(move |instance: Instance| async move {
            *sink.lock().unwrap() = Some(instance.address().to_string());
        });

        work.run(Instance::new(InstanceId(0), "a")).await;
        assert_eq!(seen.lock().unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_closure_is_observer() {
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let observer = move |_: &InstanceSnapshot| *sink.lock().unwrap() += 1;

        observer.on_release(&InstanceSnapshot {
            address: "a".to_string(),
            state: InstanceState::Ready,
            active_count: 0,
        });
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
