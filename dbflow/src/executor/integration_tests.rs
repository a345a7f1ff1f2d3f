//! End-to-end execution tests over mock components.

#[cfg(test)]
mod tests {
    use crate::component::{Component, ComponentOutcome, ComponentRegistry};
    use crate::context::Context;
    use crate::executor::{
        CompletionPolicy, Executor, GateDecision, NodeState, PipelineState,
    };
    use crate::node::{ActPayload, ApprovalSpec, BackoffConfig, ComponentRef, NodeId, RetryPolicy};
    use crate::pipeline::{PipelineBuilder, SubProcessBuilder};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct CountingComponent {
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Component for CountingComponent {
        async fn execute(&self, _payload: &ActPayload, _ctx: &Context) -> ComponentOutcome {
            self.counter.fetch_add(1, Ordering::SeqCst);
            ComponentOutcome::ok_empty()
        }
    }

    #[derive(Debug)]
    struct BindingComponent {
        value: serde_json::Value,
    }

    #[async_trait]
    impl Component for BindingComponent {
        async fn execute(&self, _payload: &ActPayload, _ctx: &Context) -> ComponentOutcome {
            ComponentOutcome::ok(self.value.clone())
        }
    }

    /// Fails with a retryable error until `succeed_after` attempts were made.
    #[derive(Debug)]
    struct FlakyComponent {
        attempts: Arc<AtomicUsize>,
        succeed_after: usize,
    }

    #[async_trait]
    impl Component for FlakyComponent {
        async fn execute(&self, _payload: &ActPayload, _ctx: &Context) -> ComponentOutcome {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.succeed_after {
                ComponentOutcome::retryable("transient agent error")
            } else {
                ComponentOutcome::ok_empty()
            }
        }
    }

    #[derive(Debug)]
    struct FatalComponent;

    #[async_trait]
    impl Component for FatalComponent {
        async fn execute(&self, _payload: &ActPayload, _ctx: &Context) -> ComponentOutcome {
            ComponentOutcome::fatal("actuator exited 1")
        }
    }

    fn noop_payload() -> ActPayload {
        ActPayload::MetaMutation {
            op: "noop".to_string(),
            cluster_id: 1,
        }
    }

    fn registry_with(entries: Vec<(&str, Arc<dyn Component>)>) -> Arc<ComponentRegistry> {
        let registry = ComponentRegistry::new();
        for (name, component) in entries {
            registry.register(ComponentRef::new(name), component);
        }
        Arc::new(registry)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn test_sequential_run_binds_outputs() {
        let registry = registry_with(vec![(
            "meta",
            Arc::new(BindingComponent {
                value: serde_json::json!({"ok": true}),
            }) as Arc<dyn Component>,
        )]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_activity("step-a", "meta", noop_payload(), Some("a_result"), RetryPolicy::None)
            .unwrap()
            .add_activity("step-b", "meta", noop_payload(), Some("b_result"), RetryPolicy::None)
            .unwrap();
        let pipeline = builder.build("sequential").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();
        let context = handle.context().clone();
        handle.join().await.unwrap();

        assert_eq!(
            context.get("a_result").unwrap(),
            serde_json::json!({"ok": true})
        );
        assert!(context.contains("b_result"));
    }

    #[tokio::test]
    async fn test_parallel_branch_writes_merged_at_fan_in() {
        let registry = registry_with(vec![(
            "meta",
            Arc::new(BindingComponent {
                value: serde_json::json!("done"),
            }) as Arc<dyn Component>,
        )]);

        let mut branch_a = SubProcessBuilder::new();
        branch_a
            .add_activity("a", "meta", noop_payload(), Some("result_a"), RetryPolicy::None)
            .unwrap();
        let mut branch_b = SubProcessBuilder::new();
        branch_b
            .add_activity("b", "meta", noop_payload(), Some("result_b"), RetryPolicy::None)
            .unwrap();

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_parallel_group(vec![
                branch_a.build("branch-a").unwrap(),
                branch_b.build("branch-b").unwrap(),
            ])
            .unwrap();
        let pipeline = builder.build("fan-out").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();
        let context = handle.context().clone();
        handle.join().await.unwrap();

        assert_eq!(context.get("result_a").unwrap(), serde_json::json!("done"));
        assert_eq!(context.get("result_b").unwrap(), serde_json::json!("done"));
    }

    #[tokio::test]
    async fn test_wait_all_lets_siblings_finish_after_failure() {
        let sibling_runs = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![
            ("fatal", Arc::new(FatalComponent) as Arc<dyn Component>),
            (
                "counting",
                Arc::new(CountingComponent {
                    counter: sibling_runs.clone(),
                }) as Arc<dyn Component>,
            ),
        ]);

        let mut failing = SubProcessBuilder::new();
        failing
            .add_activity("breaks", "fatal", noop_payload(), None, RetryPolicy::None)
            .unwrap();
        let mut sibling = SubProcessBuilder::new();
        sibling
            .add_activity("keeps-going", "counting", noop_payload(), None, RetryPolicy::None)
            .unwrap();

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_parallel_group(vec![
                failing.build("failing").unwrap(),
                sibling.build("sibling").unwrap(),
            ])
            .unwrap();
        let pipeline = builder.build("partial-failure").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();
        let result = handle.join().await;

        assert!(result.is_err());
        assert_eq!(sibling_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_automatic_retry_recovers() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![(
            "flaky",
            Arc::new(FlakyComponent {
                attempts: attempts.clone(),
                succeed_after: 3,
            }) as Arc<dyn Component>,
        )]);

        let retry = RetryPolicy::Automatic(
            BackoffConfig::default()
                .with_max_attempts(5)
                .with_base_delay_ms(1),
        );
        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_activity("flaky-step", "flaky", noop_payload(), None, retry)
            .unwrap();
        let pipeline = builder.build("retrying").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();
        handle.join().await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_automatic_retry_exhaustion_fails_branch() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![(
            "flaky",
            Arc::new(FlakyComponent {
                attempts: attempts.clone(),
                succeed_after: 100,
            }) as Arc<dyn Component>,
        )]);

        let retry = RetryPolicy::Automatic(
            BackoffConfig::default()
                .with_max_attempts(2)
                .with_base_delay_ms(1),
        );
        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_activity("flaky-step", "flaky", noop_payload(), None, retry)
            .unwrap();
        let pipeline = builder.build("exhausted").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();
        assert!(handle.join().await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_manual_retry_resumes_on_signal() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![(
            "flaky",
            Arc::new(FlakyComponent {
                attempts: attempts.clone(),
                succeed_after: 2,
            }) as Arc<dyn Component>,
        )]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_activity("halting", "flaky", noop_payload(), None, RetryPolicy::Manual)
            .unwrap();
        let pipeline = builder.build("manual-retry").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();

        wait_until(|| handle.status().nodes[0].state == NodeState::WaitingManual).await;
        assert!(handle.retry_node(NodeId(0)));
        handle.join().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pause_resumes_on_approve() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![(
            "counting",
            Arc::new(CountingComponent {
                counter: runs.clone(),
            }) as Arc<dyn Component>,
        )]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_pause("confirm")
            .unwrap()
            .add_activity("after-gate", "counting", noop_payload(), None, RetryPolicy::None)
            .unwrap();
        let pipeline = builder.build("gated").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();

        wait_until(|| handle.waiting_nodes() == vec![NodeId(0)]).await;
        assert!(handle.signal(NodeId(0), GateDecision::Approve));
        handle.join().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pause_reject_fails_pipeline() {
        let registry = registry_with(vec![]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder.add_pause("confirm").unwrap();
        let pipeline = builder.build("rejected").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();

        wait_until(|| handle.waiting_nodes() == vec![NodeId(0)]).await;
        handle.signal(NodeId(0), GateDecision::Reject);
        assert!(handle.join().await.is_err());
    }

    #[tokio::test]
    async fn test_approval_resumes_on_approve() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![(
            "counting",
            Arc::new(CountingComponent {
                counter: runs.clone(),
            }) as Arc<dyn Component>,
        )]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_approval("itsm sign-off", ApprovalSpec::new("itsm", "confirm change"))
            .unwrap()
            .add_activity("after-approval", "counting", noop_payload(), None, RetryPolicy::None)
            .unwrap();
        let pipeline = builder.build("approved").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();

        wait_until(|| handle.waiting_nodes() == vec![NodeId(0)]).await;
        assert_eq!(
            handle.status().nodes[0].state,
            NodeState::WaitingManual
        );
        assert!(handle.signal(NodeId(0), GateDecision::Approve));
        handle.join().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_approval_reject_fails_with_service_name() {
        let registry = registry_with(vec![]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_approval("itsm sign-off", ApprovalSpec::new("itsm", "confirm change"))
            .unwrap();
        let pipeline = builder.build("refused").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();

        wait_until(|| handle.waiting_nodes() == vec![NodeId(0)]).await;
        handle.signal(NodeId(0), GateDecision::Reject);

        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("itsm"));
    }

    #[tokio::test]
    async fn test_abort_during_pause_keeps_context_and_skips_rest() {
        let later_runs = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![
            (
                "binding",
                Arc::new(BindingComponent {
                    value: serde_json::json!("kept"),
                }) as Arc<dyn Component>,
            ),
            (
                "counting",
                Arc::new(CountingComponent {
                    counter: later_runs.clone(),
                }) as Arc<dyn Component>,
            ),
        ]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_activity("before", "binding", noop_payload(), Some("early_write"), RetryPolicy::None)
            .unwrap()
            .add_pause("confirm")
            .unwrap()
            .add_activity("after", "counting", noop_payload(), None, RetryPolicy::None)
            .unwrap();
        let pipeline = builder.build("abortable").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();

        wait_until(|| handle.waiting_nodes() == vec![NodeId(1)]).await;
        handle.abort();
        let context = handle.context().clone();
        assert!(handle.join().await.is_err());

        assert_eq!(context.get("early_write").unwrap(), serde_json::json!("kept"));
        assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_is_a_distinct_terminal_state() {
        let registry = registry_with(vec![]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder.add_pause("confirm").unwrap();
        let pipeline = builder.build("aborted").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();

        wait_until(|| handle.waiting_nodes() == vec![NodeId(0)]).await;
        handle.abort();
        wait_until(|| handle.state() != PipelineState::Running).await;
        assert_eq!(handle.state(), PipelineState::Aborted);
        let _ = handle.join().await;
    }

    #[tokio::test]
    async fn test_past_deadline_timer_completes_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![(
            "counting",
            Arc::new(CountingComponent {
                counter: runs.clone(),
            }) as Arc<dyn Component>,
        )]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_timer("already-due", chrono::Utc::now() - chrono::Duration::hours(1))
            .unwrap()
            .add_activity("after-timer", "counting", noop_payload(), None, RetryPolicy::None)
            .unwrap();
        let pipeline = builder.build("timed").unwrap();

        let executor = Executor::new(registry);
        let handle = executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .unwrap();
        handle.join().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_component_rejected_at_submission() {
        let registry = registry_with(vec![]);

        let mut builder = PipelineBuilder::new(HashMap::new(), &[]).unwrap();
        builder
            .add_activity("orphan", "nobody-home", noop_payload(), None, RetryPolicy::None)
            .unwrap();
        let pipeline = builder.build("unresolvable").unwrap();

        let executor = Executor::new(registry);
        assert!(executor
            .submit(pipeline, CompletionPolicy::WaitAll)
            .is_err());
    }
}
