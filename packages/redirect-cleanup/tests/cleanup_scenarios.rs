//! End-to-end cleanup scenarios over in-memory stores.
//!
//! Covers the full job lifecycle:
//! 1. Analyze redirect rules
//! 2. Start and process a job (dry run or live)
//! 3. Inspect progress and results
//! 4. Roll back

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use redirect_cleanup::{
    testing::{self, FailingContentStore, TestScenario},
    CleanupEngine, CleanupError, ContentId, ContentItem, ContentType, JobOptions, JobStatus, KvStore,
    MemoryContentStore, MemoryKvStore, MemoryRuleSource, RedirectRule, RollbackError,
};

const POST_1_AFTER: &str = r#"<p>Read <a href="/final-page">this</a> and <a href="https://example.com/final-page">that</a>.</p>"#;

#[tokio::test]
async fn test_chain_is_collapsed_and_content_rewritten() {
    let scenario = TestScenario::chain().await;
    let before = scenario.content_snapshot();

    let analysis = scenario.engine.get_analysis_data().await.unwrap();
    assert_eq!(analysis.total_redirections, 2);
    assert_eq!(analysis.redirect_chains_resolved, 1);
    assert_eq!(analysis.url_mapping.get("/old-page"), Some("/final-page"));
    assert_eq!(analysis.url_mapping.get("/new-page"), Some("/final-page"));
    assert_eq!(analysis.total_occurrences(), 4);

    let job_id = scenario
        .engine
        .start_cleanup_process(JobOptions::builder().batch_size(1usize).build())
        .await
        .unwrap();
    assert_eq!(
        scenario.engine.get_job_progress(job_id).await.unwrap().status,
        JobStatus::Pending
    );

    let job = scenario.engine.process_cleanup_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.finished_at.is_some());
    assert_eq!(job.results.posts_updated, 2);
    assert_eq!(job.results.meta_updated, 1);
    assert_eq!(job.results.options_updated, 1);
    assert_eq!(job.results.urls_replaced, 4);
    assert_eq!(job.results.failed_items, 0);

    assert_eq!(
        scenario.content.value(&ContentId::post("1")).unwrap(),
        POST_1_AFTER
    );
    assert_eq!(
        scenario.content.value(&ContentId::post("2")).unwrap(),
        "<p>Nothing to see at /old-page-archive</p>"
    );
    assert_eq!(
        scenario.content.value(&ContentId::meta("1:cta_link")).unwrap(),
        "/final-page"
    );
    assert_eq!(
        scenario.content.value(&ContentId::option("footer_html")).unwrap(),
        r#"<a href="/final-page">Next</a>"#
    );

    let progress = scenario.engine.get_job_progress(job_id).await.unwrap();
    assert_eq!(progress.processed_mappings, 2);
    assert_eq!(progress.percent_complete, 100.0);

    let outcome = scenario.engine.rollback_changes(job_id).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.restored_count, 3);
    assert_eq!(scenario.content_snapshot(), before);
    assert_eq!(
        scenario.engine.get_job_details(job_id).await.unwrap().status,
        JobStatus::RolledBack
    );
}

#[tokio::test]
async fn test_job_without_analysis_is_rejected() {
    let scenario = TestScenario::new(
        testing::chain_rules(),
        testing::chain_content(),
        testing::default_config(),
    );

    let err = scenario
        .engine
        .start_cleanup_process(JobOptions::live())
        .await
        .unwrap_err();

    assert!(matches!(err, CleanupError::AnalysisMissing));
    assert!(scenario.engine.get_recent_jobs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalidated_cache_blocks_new_jobs() {
    let scenario = TestScenario::chain().await;
    scenario.engine.invalidate_cache().await.unwrap();

    let err = scenario
        .engine
        .start_cleanup_process(JobOptions::dry_run())
        .await
        .unwrap_err();
    assert!(matches!(err, CleanupError::AnalysisMissing));
}

#[tokio::test]
async fn test_dry_run_leaves_content_untouched() {
    let scenario = TestScenario::chain().await;
    let before = scenario.content_snapshot();

    let job = scenario
        .engine
        .run_cleanup(JobOptions::dry_run())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results.urls_replaced, 4);
    assert_eq!(job.results.backups_created, 0);
    assert_eq!(scenario.content_snapshot(), before);
}

#[tokio::test]
async fn test_second_live_run_replaces_nothing() {
    let scenario = TestScenario::chain().await;

    let first = scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();
    let after_first = scenario.content_snapshot();

    let second = scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();

    assert_eq!(first.results.urls_replaced, 4);
    assert_eq!(second.results.urls_replaced, 0);
    assert_eq!(scenario.content_snapshot(), after_first);
}

#[tokio::test]
async fn test_job_ids_are_unique() {
    let scenario = TestScenario::chain().await;
    let mut ids = HashSet::new();

    for _ in 0..50 {
        let id = scenario
            .engine
            .start_cleanup_process(JobOptions::dry_run())
            .await
            .unwrap();
        assert!(ids.insert(id));
    }
    assert_eq!(scenario.engine.get_recent_jobs(100).await.unwrap().len(), 50);
}

#[tokio::test]
async fn test_second_live_job_is_rejected_while_one_runs() {
    let scenario = TestScenario::chain().await;

    // Simulate a job that was interrupted mid-run and still holds the lock.
    let running = scenario
        .engine
        .start_cleanup_process(JobOptions::live())
        .await
        .unwrap();
    let mut job = scenario.engine.get_job_details(running).await.unwrap();
    job.transition(JobStatus::Running).unwrap();
    scenario
        .kv
        .set(&format!("job:{running}"), serde_json::to_string(&job).unwrap(), None)
        .await
        .unwrap();
    scenario
        .kv
        .set("lock:live", running.to_string(), None)
        .await
        .unwrap();

    let second = scenario
        .engine
        .start_cleanup_process(JobOptions::live())
        .await
        .unwrap();
    let err = scenario.engine.process_cleanup_job(second).await.unwrap_err();

    assert!(matches!(err, CleanupError::LiveJobActive { holder } if holder == running));
    assert_eq!(
        scenario.engine.get_job_details(second).await.unwrap().status,
        JobStatus::Pending
    );

    // Dry runs do not need the lock.
    let preview = scenario.engine.run_cleanup(JobOptions::dry_run()).await.unwrap();
    assert_eq!(preview.status, JobStatus::Completed);

    // The interrupted job resumes and releases the lock.
    let resumed = scenario.engine.process_cleanup_job(running).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    let job = scenario.engine.process_cleanup_job(second).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_failed_writes_are_tallied() {
    let scenario = TestScenario::chain().await;
    scenario.content.fail_writes_for(ContentId::meta("1:cta_link"));

    let job = scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results.failed_items, 1);
    assert_eq!(job.results.meta_updated, 0);
    assert_eq!(job.results.posts_updated, 1);
    assert_eq!(
        scenario.content.value(&ContentId::meta("1:cta_link")).unwrap(),
        "/old-page"
    );
}

#[tokio::test]
async fn test_live_run_keeps_embedded_urls() {
    let archived = r#"<a href="https://web.archive.org/web/2020/https://other.org/page">y</a>"#;
    let scenario = TestScenario::new(
        vec![RedirectRule::new("/old", "/new")],
        vec![ContentItem::new(
            ContentId::post("1"),
            format!(r#"<a href="/old">x</a> {archived}"#),
        )],
        testing::default_config(),
    );
    scenario.engine.analyze_redirections().await.unwrap();

    let job = scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();

    assert_eq!(job.results.urls_replaced, 1);
    assert_eq!(
        scenario.content.value(&ContentId::post("1")).unwrap(),
        format!(r#"<a href="/new">x</a> {archived}"#)
    );
}

#[tokio::test]
async fn test_fatal_error_fails_job_with_partial_results() {
    let content = Arc::new(MemoryContentStore::with_items(testing::chain_content()));
    let kv = Arc::new(MemoryKvStore::new());
    let engine = CleanupEngine::new(
        Arc::new(MemoryRuleSource::new(testing::chain_rules())),
        // analysis lists options once, the first batch once more
        Arc::new(FailingContentStore::new(content.clone(), ContentType::Options, 2)),
        kv,
        testing::default_config(),
    );
    engine.analyze_redirections().await.unwrap();

    let job_id = engine
        .start_cleanup_process(JobOptions::builder().batch_size(1usize).build())
        .await
        .unwrap();
    let err = engine.process_cleanup_job(job_id).await.unwrap_err();
    assert!(matches!(err, CleanupError::Content(_)));

    let job = engine.get_job_details(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());
    assert_eq!(job.next_offset, 1);
    assert!(job.results.urls_replaced > 0);
    assert!(job.logs.iter().any(|l| l.contains("Job failed")));
}

#[tokio::test]
async fn test_rollback_of_dry_run_fails() {
    let scenario = TestScenario::chain().await;
    let job = scenario.engine.run_cleanup(JobOptions::dry_run()).await.unwrap();

    let err = scenario.engine.rollback_changes(job.id).await.unwrap_err();

    assert!(matches!(
        err,
        CleanupError::Rollback(RollbackError::NoBackups { .. })
    ));
    assert_eq!(
        scenario.engine.get_job_details(job.id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_rollback_without_backups_fails() {
    let scenario = TestScenario::chain().await;
    let before = scenario.content_snapshot();
    let job = scenario
        .engine
        .run_cleanup(JobOptions::builder().create_backup(false).build())
        .await
        .unwrap();
    assert_ne!(scenario.content_snapshot(), before);

    let err = scenario.engine.rollback_changes(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        CleanupError::Rollback(RollbackError::NoBackups { .. })
    ));
}

#[tokio::test]
async fn test_second_rollback_fails() {
    let scenario = TestScenario::chain().await;
    let job = scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();

    scenario.engine.rollback_changes(job.id).await.unwrap();
    let err = scenario.engine.rollback_changes(job.id).await.unwrap_err();

    assert!(matches!(
        err,
        CleanupError::Rollback(RollbackError::AlreadyRolledBack { .. })
    ));
}

#[tokio::test]
async fn test_rollback_of_pending_job_fails() {
    let scenario = TestScenario::chain().await;
    let job_id = scenario
        .engine
        .start_cleanup_process(JobOptions::live())
        .await
        .unwrap();

    let err = scenario.engine.rollback_changes(job_id).await.unwrap_err();
    assert!(matches!(
        err,
        CleanupError::Rollback(RollbackError::InvalidState {
            status: JobStatus::Pending,
            ..
        })
    ));
}

#[tokio::test]
async fn test_rollback_aborts_when_item_is_gone() {
    let scenario = TestScenario::chain().await;
    let job = scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();
    scenario.content.remove(&ContentId::meta("1:cta_link"));
    let before = scenario.content_snapshot();

    let err = scenario.engine.rollback_changes(job.id).await.unwrap_err();

    assert!(matches!(
        err,
        CleanupError::Rollback(RollbackError::ItemMissing { .. })
    ));
    assert_eq!(scenario.content_snapshot(), before);
}

#[tokio::test]
async fn test_failed_restore_is_undone() {
    let scenario = TestScenario::chain().await;
    let job = scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();
    let before = scenario.content_snapshot();

    // Backups are restored in key order: meta, options, posts.
    scenario.content.fail_writes_for(ContentId::post("1"));
    let err = scenario.engine.rollback_changes(job.id).await.unwrap_err();

    assert!(matches!(
        err,
        CleanupError::Rollback(RollbackError::RestoreFailed { .. })
    ));
    assert_eq!(scenario.content_snapshot(), before);
    assert_eq!(
        scenario.engine.get_job_details(job.id).await.unwrap().status,
        JobStatus::Completed
    );

    scenario.content.clear_failures();
    assert!(scenario.engine.rollback_changes(job.id).await.unwrap().success);
}

#[tokio::test]
async fn test_backup_keeps_value_before_first_write() {
    let scenario = TestScenario::chain().await;
    let job = scenario
        .engine
        .run_cleanup(JobOptions::builder().batch_size(1usize).build())
        .await
        .unwrap();

    // post 1 is written by both batches, but backed up once
    assert_eq!(job.results.backups_created, 3);

    scenario.engine.rollback_changes(job.id).await.unwrap();
    assert_eq!(
        scenario.content.value(&ContentId::post("1")).unwrap(),
        testing::chain_content()[0].value
    );
}

#[tokio::test]
async fn test_cycles_are_dropped_and_reported() {
    let scenario = TestScenario::new(
        vec![
            RedirectRule::new("/a", "/b"),
            RedirectRule::new("/b", "/a"),
            RedirectRule::new("/loop", "/loop/"),
            RedirectRule::new("/ok", "/fine"),
        ],
        vec![],
        testing::default_config(),
    );

    let analysis = scenario.engine.analyze_redirections().await.unwrap();

    assert_eq!(analysis.url_mapping.len(), 1);
    assert_eq!(analysis.url_mapping.get("/ok"), Some("/fine"));
    assert_eq!(analysis.unresolved.len(), 3);
    assert!(analysis.url_mapping.is_fully_resolved());
}

#[tokio::test]
async fn test_empty_rule_table() {
    let scenario = TestScenario::new(vec![], testing::chain_content(), testing::default_config());

    let analysis = scenario.engine.analyze_redirections().await.unwrap();
    assert_eq!(analysis.total_redirections, 0);
    assert!(analysis.url_mapping.is_empty());

    let job = scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results.urls_replaced, 0);
    assert_eq!(job.progress().percent_complete, 100.0);
}

#[tokio::test]
async fn test_content_type_selection() {
    let scenario = TestScenario::chain().await;
    let job = scenario
        .engine
        .run_cleanup(
            JobOptions::builder()
                .content_types(vec![ContentType::Options])
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(job.results.options_updated, 1);
    assert_eq!(job.results.posts_updated, 0);
    assert_eq!(
        scenario.content.value(&ContentId::meta("1:cta_link")).unwrap(),
        "/old-page"
    );
}

proptest! {
    #[test]
    fn live_cleanup_is_idempotent(
        links in proptest::collection::vec(prop_oneof![
            Just("/old-page"),
            Just("/new-page/"),
            Just("https://example.com/old-page"),
            Just("/old-page-archive"),
            Just("/elsewhere"),
        ], 0..8)
    ) {
        let body: String = links
            .iter()
            .map(|l| format!(r#"<a href="{l}">x</a> "#))
            .collect();

        tokio_test::block_on(async {
            let scenario = TestScenario::new(
                testing::chain_rules(),
                vec![redirect_cleanup::ContentItem::new(ContentId::post("1"), body)],
                testing::default_config(),
            );
            scenario.engine.analyze_redirections().await.unwrap();

            scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();
            let once = scenario.content_snapshot();
            let second = scenario.engine.run_cleanup(JobOptions::live()).await.unwrap();

            assert_eq!(second.results.urls_replaced, 0);
            assert_eq!(scenario.content_snapshot(), once);
        });
    }
}
