// tests/job_queue.rs
//
// Dispatch, failure modes and state-machine guarantees of the job queue.

use std::sync::Arc;
use std::time::Duration;

use newsflow::ingest::types::FeedItem;
use newsflow::jobs::processors::{processor_fn, register_default_processors};
use newsflow::store::{FeedItemRepository, MemoryStore};
use newsflow::jobs::types::{FactCheck, GenerateArticle, PublishArticle};
use newsflow::jobs::{Job, JobPayload, JobQueue, JobStatus, JobType, NO_PROCESSOR};
use serde_json::json;

fn fact_check(id: &str) -> JobPayload {
    JobPayload::FactCheck(FactCheck {
        article_id: id.into(),
    })
}

async fn settle(q: &JobQueue, id: &str) -> Job {
    for _ in 0..1_000 {
        let job = q.get_job(id).expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {id} never reached a terminal state");
}

#[tokio::test]
async fn add_job_returns_before_processing() {
    let q = JobQueue::new(Duration::from_secs(5));
    q.register_processor(
        JobType::FactCheck,
        processor_fn(|_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!({"verdict": "accurate"}))
        }),
    );

    let id = q.add_job(fact_check("a1"));
    let fresh = q.get_job(&id).unwrap();
    assert!(matches!(fresh.status, JobStatus::Pending | JobStatus::Processing));
    assert!(fresh.completed_at.is_none());

    let done = settle(&q, &id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result, Some(json!({"verdict": "accurate"})));
    assert!(done.processed_at.is_some());
    assert!(done.completed_at >= done.processed_at);
}

#[tokio::test]
async fn job_without_processor_fails_with_fixed_message() {
    let q = JobQueue::new(Duration::from_secs(5));
    let id = q.add_job(JobPayload::PublishArticle(PublishArticle {
        article_id: "p1".into(),
    }));

    let job = settle(&q, &id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(NO_PROCESSOR));
}

#[tokio::test(start_paused = true)]
async fn processor_that_never_returns_is_timed_out() {
    let q = JobQueue::new(Duration::from_secs(30));
    q.register_processor(
        JobType::FactCheck,
        processor_fn(|_| async {
            std::future::pending::<()>().await;
            Ok(json!(null))
        }),
    );

    let id = q.add_job(fact_check("stuck"));
    tokio::time::sleep(Duration::from_secs(31)).await;

    let job = q.get_job(&id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("processor timed out after 30s"));
}

#[tokio::test]
async fn observed_statuses_only_move_forward() {
    let q = JobQueue::new(Duration::from_secs(5));
    q.register_processor(
        JobType::FactCheck,
        processor_fn(|_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!(true))
        }),
    );
    let id = q.add_job(fact_check("m"));

    let rank = |s: JobStatus| match s {
        JobStatus::Pending => 0,
        JobStatus::Processing => 1,
        JobStatus::Completed | JobStatus::Failed => 2,
    };
    let mut last = 0;
    loop {
        let status = q.get_job(&id).unwrap().status;
        assert!(rank(status) >= last, "went backwards to {status:?}");
        last = rank(status);
        if status.is_terminal() {
            break;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stats_always_sum_to_total_under_load() {
    let q = JobQueue::new(Duration::from_secs(5));
    q.register_processor(
        JobType::FactCheck,
        processor_fn(|p| async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            match p {
                JobPayload::FactCheck(fc) if fc.article_id.ends_with('7') => {
                    anyhow::bail!("source unreachable")
                }
                _ => Ok(json!("ok")),
            }
        }),
    );

    let mut producers = Vec::new();
    for t in 0..4 {
        let q = Arc::clone(&q);
        producers.push(tokio::spawn(async move {
            for i in 0..50 {
                q.add_job(fact_check(&format!("{t}-{i}")));
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    // Mix in a type with no processor.
    q.add_job(JobPayload::GenerateArticle(GenerateArticle {
        item_key: "k".into(),
        article_type: Default::default(),
        depth: Default::default(),
        publish: false,
    }));

    loop {
        let s = q.get_stats();
        assert_eq!(s.pending + s.processing + s.completed + s.failed, s.total);
        if s.total == 201 && s.pending == 0 && s.processing == 0 {
            // 4 producers x 5 ids ending in 7, plus the unhandled type.
            assert_eq!(s.failed, 21);
            assert_eq!(s.completed, 180);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for p in producers {
        p.await.unwrap();
    }
    assert_eq!(q.get_all_jobs().len(), 201);
}

#[tokio::test]
async fn fact_check_runs_over_items_and_generated_drafts() {
    let store = Arc::new(MemoryStore::new());
    let now = chrono::Utc::now();
    store
        .insert_if_absent(FeedItem {
            dedup_key: "etf".into(),
            title: "Bitcoin price jumps 12% after ETF approval".into(),
            summary: "Traders bid BTC to $71,000 on the news.".into(),
            content: String::new(),
            url: "https://wire.test/etf".into(),
            source: "Wire".into(),
            published_at: now,
            importance: 90,
            sentiment: 0.7,
            has_generated_article: false,
            coins: vec!["BTC".into()],
            collected_at: now,
        })
        .await
        .unwrap();

    let q = JobQueue::new(Duration::from_secs(5));
    register_default_processors(&q, store.clone());

    let on_item = settle(&q, &q.add_job(fact_check("etf"))).await;
    assert_eq!(on_item.status, JobStatus::Completed);
    let report = on_item.result.unwrap();
    assert_eq!(report["articleId"], "etf");
    assert_eq!(report["verified"], 1, "12% is plausible");
    let kinds: Vec<_> = report["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["type"].as_str().unwrap().to_string())
        .collect();
    assert!(kinds.contains(&"price".to_string()), "{kinds:?}");
    assert!(kinds.contains(&"percentage".to_string()), "{kinds:?}");

    let draft = settle(
        &q,
        &q.add_job(JobPayload::GenerateArticle(GenerateArticle {
            item_key: "etf".into(),
            article_type: Default::default(),
            depth: Default::default(),
            publish: false,
        })),
    )
    .await;
    assert_eq!(draft.status, JobStatus::Completed);
    let on_draft = settle(&q, &q.add_job(fact_check(&draft.id))).await;
    assert_eq!(on_draft.status, JobStatus::Completed);
    assert!(on_draft.result.unwrap()["totalFacts"].as_u64().unwrap() >= 2);

    let missing = settle(&q, &q.add_job(fact_check("nowhere"))).await;
    assert_eq!(missing.status, JobStatus::Failed);
    assert!(missing.error.unwrap().contains("nowhere"));
}
