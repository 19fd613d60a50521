//! End-to-End Query Scenarios
//!
//! Every test here parses a query, executes it against the in-memory
//! backends and checks the shaped result:
//!
//! 1. **Natural Join** - operators pair series on shared tags
//! 2. **Group By** - aggregation keeps only the grouping tags
//! 3. **Fetch Quota** - a request stops once its series budget is spent
//! 4. **Resolution Choice** - windowing functions widen the fetched range
//! 5. **Constraints** - extra predicates narrow every metric leaf
//! 6. **Describe** - metadata listing commands

use mqe::engine::{MemoryMetadata, MemoryStorage, MetricMetadata};
use mqe::fetch::ParallelFetcher;
use mqe::query::command::CommandBody;
use mqe::query::parser::parse_at;
use mqe::query::{ExecutionContext, Predicate, QueryResult};
use mqe::types::{MetricKey, TagSet, TaggedMetric, Timeseries};
use mqe::QueryError;
use std::sync::Arc;

// =============================================================================
// Test Helpers
// =============================================================================

/// 2015-06-02T00:00:00Z, a multiple of every offered resolution
const NOW: i64 = 1_433_203_200_000;
const DAY: i64 = 86_400_000;

/// Backends with one resolution of 100ms, fed series by series
struct Fixture {
    storage: Arc<MemoryStorage>,
    metadata: Arc<MemoryMetadata>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_storage(MemoryStorage::new().with_resolutions(vec![100]))
    }

    fn with_storage(storage: MemoryStorage) -> Self {
        Self {
            storage: Arc::new(storage),
            metadata: Arc::new(MemoryMetadata::new()),
        }
    }

    /// Record a series with one point per slot of `[0, 200]` at 100ms
    async fn add(&self, metric: &str, tags: &[(&str, &str)], values: &[Option<f64>]) {
        let metric = TaggedMetric::new(MetricKey::from(metric), TagSet::from_pairs(tags));
        let points = values
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| value.map(|v| (slot as i64 * 100, v)));
        self.storage.add_points(metric.clone(), points);
        self.metadata.add_metric(metric).await.unwrap();
    }

    fn context(&self, fetch_limit: usize) -> ExecutionContext {
        let fetcher = Arc::new(ParallelFetcher::new(self.storage.clone(), 4));
        ExecutionContext::new(fetcher, self.metadata.clone(), fetch_limit)
    }
}

async fn run(query: &str, ctx: &ExecutionContext) -> Result<Vec<QueryResult>, QueryError> {
    let command = parse_at(query, NOW)?;
    match command.execute(ctx).await?.body {
        CommandBody::Results(results) => Ok(results),
        other => panic!("expected select results, got {:?}", other),
    }
}

fn series_of(result: &QueryResult) -> &[Timeseries] {
    result.series.as_deref().expect("series result")
}

fn find<'a>(series: &'a [Timeseries], key: &str, value: &str) -> &'a Timeseries {
    series
        .iter()
        .find(|s| s.tagset.get(key) == Some(value))
        .unwrap_or_else(|| panic!("no series tagged {}={}", key, value))
}

fn assert_values(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{:?} vs {:?}", actual, expected);
    for (a, e) in actual.iter().zip(expected) {
        if e.is_nan() {
            assert!(a.is_nan(), "expected NaN, got {}", a);
        } else {
            assert!((a - e).abs() < 1e-9, "expected {}, got {}", e, a);
        }
    }
}

const FULL: [Option<f64>; 3] = [Some(1.0), Some(1.0), Some(1.0)];

fn constant(value: f64) -> [Option<f64>; 3] {
    [Some(value); 3]
}

// =============================================================================
// Natural Join
// =============================================================================

#[tokio::test]
async fn test_addition_joins_on_shared_tags() {
    let fixture = Fixture::new();
    fixture.add("alpha", &[("dc", "west"), ("host", "h1")], &constant(1.0)).await;
    fixture.add("alpha", &[("dc", "east"), ("host", "h2")], &constant(2.0)).await;
    fixture.add("beta", &[("dc", "west")], &constant(10.0)).await;
    fixture.add("beta", &[("dc", "east")], &constant(20.0)).await;

    let ctx = fixture.context(100);
    let results = run("select alpha + beta from 0 to 200 resolution 100", &ctx).await.unwrap();
    assert_eq!(results.len(), 1);

    let series = series_of(&results[0]);
    assert_eq!(series.len(), 2);
    let west = find(series, "dc", "west");
    assert_eq!(west.tagset, TagSet::from_pairs(&[("dc", "west"), ("host", "h1")]));
    assert_values(&west.values, &[11.0, 11.0, 11.0]);
    let east = find(series, "dc", "east");
    assert_eq!(east.tagset, TagSet::from_pairs(&[("dc", "east"), ("host", "h2")]));
    assert_values(&east.values, &[22.0, 22.0, 22.0]);
}

#[tokio::test]
async fn test_scalar_operands_broadcast() {
    let fixture = Fixture::new();
    fixture.add("alpha", &[("host", "h1")], &[Some(1.0), Some(2.0), Some(3.0)]).await;

    let ctx = fixture.context(100);
    let results = run("select alpha * 10 - 1 from 0 to 200 resolution 100", &ctx).await.unwrap();
    let series = series_of(&results[0]);
    assert_eq!(series.len(), 1);
    assert_values(&series[0].values, &[9.0, 19.0, 29.0]);
}

// =============================================================================
// Group By
// =============================================================================

async fn environment_fixture() -> Fixture {
    let fixture = Fixture::new();
    let rows: [(&str, &str, &str, [Option<f64>; 3]); 5] = [
        ("staging", "A", "q", [Some(0.0), Some(1.0), Some(2.0)]),
        ("staging", "B", "r", [Some(4.0), Some(4.0), Some(4.0)]),
        ("production", "A", "s", [Some(-1.0), Some(-1.0), Some(2.0)]),
        ("production", "A", "t", [Some(0.0), Some(2.0), Some(0.0)]),
        ("production", "B", "u", [Some(2.0), None, Some(0.0)]),
    ];
    for (env, dc, host, values) in rows {
        fixture
            .add("requests", &[("env", env), ("dc", dc), ("host", host)], &values)
            .await;
    }
    fixture
}

#[tokio::test]
async fn test_aggregate_sum_group_by_env() {
    let fixture = environment_fixture().await;
    let ctx = fixture.context(100);
    let results = run(
        "select aggregate.sum(requests group by env) from 0 to 200 resolution 100",
        &ctx,
    )
    .await
    .unwrap();

    let series = series_of(&results[0]);
    assert_eq!(series.len(), 2);
    let staging = find(series, "env", "staging");
    assert_eq!(staging.tagset, TagSet::from_pairs(&[("env", "staging")]));
    assert_values(&staging.values, &[4.0, 5.0, 6.0]);
    let production = find(series, "env", "production");
    assert_eq!(production.tagset, TagSet::from_pairs(&[("env", "production")]));
    assert_values(&production.values, &[1.0, 1.0, 2.0]);
}

#[tokio::test]
async fn test_aggregate_collapse_removes_tags() {
    let fixture = environment_fixture().await;
    let ctx = fixture.context(100);
    let results = run(
        "select aggregate.count(requests collapse by host, dc) from 0 to 200 resolution 100",
        &ctx,
    )
    .await
    .unwrap();

    let series = series_of(&results[0]);
    assert_eq!(series.len(), 2);
    assert_values(&find(series, "env", "staging").values, &[2.0, 2.0, 2.0]);
    assert_values(&find(series, "env", "production").values, &[3.0, 2.0, 3.0]);
    assert!(series.iter().all(|s| s.tagset.len() == 1));
}

// =============================================================================
// Fetch Quota
// =============================================================================

#[tokio::test]
async fn test_fetch_limit_counts_every_leaf() {
    let fixture = Fixture::new();
    for host in ["a", "b", "c", "d", "e", "f"] {
        fixture.add("m", &[("host", host)], &FULL).await;
    }

    // Six series per leaf: 6 + 6 fits in 13, the third leaf does not
    let ctx = fixture.context(13);
    let err = run("select m + m + m from 0 to 200 resolution 100", &ctx).await.unwrap_err();
    match &err {
        QueryError::FetchLimitExceeded {
            total,
            limit,
            additional,
        } => {
            assert_eq!((*total, *limit, *additional), (18, 13, 6));
        },
        other => panic!("expected fetch limit error, got {:?}", other),
    }
    let message = err.to_string();
    assert!(message.contains("18"));
    assert!(message.contains("13"));
    assert!(message.contains("6 additional"));

    // The budget is per request
    let ctx = fixture.context(18);
    let results = run("select m + m + m from 0 to 200 resolution 100", &ctx).await.unwrap();
    assert_eq!(series_of(&results[0]).len(), 6);
}

// =============================================================================
// Resolution Choice
// =============================================================================

async fn aged_fixture() -> (Fixture, ExecutionContext) {
    let storage = MemoryStorage::new()
        .with_now(NOW)
        .with_age_rule(DAY, 300_000);
    let fixture = Fixture::with_storage(storage);
    fixture.add("foo", &[("host", "a")], &[]).await;
    let mut ctx = fixture.context(100);
    ctx.slot_limit = 10_000;
    (fixture, ctx)
}

async fn resolution_of(query: &str, ctx: &ExecutionContext) -> i64 {
    let results = run(query, ctx).await.unwrap();
    results[0].timerange.expect("series timerange").resolution()
}

#[tokio::test]
async fn test_resolution_follows_age_rule() {
    let (_fixture, ctx) = aged_fixture().await;
    assert_eq!(resolution_of("select foo from -24h to now", &ctx).await, 30_000);
    assert_eq!(resolution_of("select foo from -1441m to now", &ctx).await, 300_000);
}

#[tokio::test]
async fn test_resolution_accounts_for_function_windows() {
    let (_fixture, ctx) = aged_fixture().await;
    assert_eq!(
        resolution_of("select foo | transform.moving_average(5m) from -1d to now", &ctx).await,
        300_000
    );
    assert_eq!(
        resolution_of(
            "select foo | transform.moving_average(5m) | transform.timeshift(5m) from -1d to now",
            &ctx
        )
        .await,
        30_000
    );
}

#[tokio::test]
async fn test_slot_limit_rejects_wide_queries() {
    let fixture = Fixture::new();
    fixture.add("alpha", &[("host", "h1")], &FULL).await;
    let mut ctx = fixture.context(100);
    ctx.slot_limit = 1;

    let err = run("select alpha from 0 to 200 resolution 100", &ctx).await.unwrap_err();
    assert!(matches!(err, QueryError::SlotLimitExceeded { .. }), "{:?}", err);
}

// =============================================================================
// Constraints
// =============================================================================

#[tokio::test]
async fn test_additional_constraints_narrow_leaves() {
    let fixture = environment_fixture().await;
    let mut ctx = fixture.context(100);
    ctx.additional_constraints = Predicate::equals("env", "staging");

    let results = run("select requests where dc = 'A' from 0 to 200 resolution 100", &ctx)
        .await
        .unwrap();
    let series = series_of(&results[0]);
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].tagset.get("host"), Some("q"));
}

#[tokio::test]
async fn test_constraint_decoded_from_json() {
    let fixture = environment_fixture().await;
    let mut ctx = fixture.context(100);
    let constraint = mqe::query::constraint::Constraint::from_json(
        r#"{"any": [{"key_is": {"key": "host", "value": "r"}}, {"key_is": {"key": "host", "value": "u"}}]}"#,
    )
    .unwrap();
    ctx.additional_constraints = constraint.to_predicate().unwrap();

    let results = run("select requests from 0 to 200 resolution 100", &ctx).await.unwrap();
    let mut hosts: Vec<&str> = series_of(&results[0])
        .iter()
        .filter_map(|s| s.tagset.get("host"))
        .collect();
    hosts.sort_unstable();
    assert_eq!(hosts, vec!["r", "u"]);
}

// =============================================================================
// Describe
// =============================================================================

#[tokio::test]
async fn test_describe_lists_tag_values() {
    let fixture = environment_fixture().await;
    let ctx = fixture.context(100);

    let command = parse_at("describe requests where env = 'production'", NOW).unwrap();
    let result = command.execute(&ctx).await.unwrap();
    let CommandBody::Tags(tags) = result.body else {
        panic!("expected tags");
    };
    assert_eq!(tags["host"], vec!["s", "t", "u"]);
    assert_eq!(tags["dc"], vec!["A", "B"]);
    assert_eq!(tags["env"], vec!["production"]);
}

#[tokio::test]
async fn test_describe_all_and_metrics_for_tag() {
    let fixture = environment_fixture().await;
    fixture.add("latency", &[("host", "q")], &FULL).await;
    let ctx = fixture.context(100);

    let all = parse_at("describe all", NOW).unwrap().execute(&ctx).await.unwrap();
    assert_eq!(
        all.body,
        CommandBody::Metrics(vec![MetricKey::from("latency"), MetricKey::from("requests")])
    );

    let tagged = parse_at("describe metrics where host = 'q'", NOW)
        .unwrap()
        .execute(&ctx)
        .await
        .unwrap();
    assert_eq!(tagged.metadata["count"], 2);
}
