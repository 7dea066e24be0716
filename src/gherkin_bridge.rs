use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use cucumber::{writer, writer::Stats as _, World as _};
use tempfile::TempDir;

use crate::error::{ErrorCode, ProbeError, ProbeResult};
use crate::ids::TestId;
use crate::kafka::StreamIndex;
use crate::model::TestResult;
use crate::storage::StagingFs;

/// Cucumber world carried through one test's step definitions (§4.6). The
/// DSL reaches Kafka streams through `streams`, never by constructing its
/// own producer/consumer.
#[derive(cucumber::World)]
#[world(init = Self::new)]
pub struct ProbeWorld {
    pub test_id: TestId,
    pub streams: Arc<StreamIndex>,
    pub active_topic: Option<String>,
    pub last_correlation_id: Option<String>,
}

impl std::fmt::Debug for ProbeWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeWorld").field("test_id", &self.test_id).finish()
    }
}

tokio::task_local! {
    static ACTIVE_TEST: ActiveTest;
}

struct ActiveTest {
    test_id: TestId,
    streams: Arc<StreamIndex>,
}

impl ProbeWorld {
    fn new() -> Self {
        ACTIVE_TEST.with(|active| Self {
            test_id: active.test_id,
            streams: active.streams.clone(),
            active_topic: None,
            last_correlation_id: None,
        })
    }
}

/// Runs the Gherkin suite staged for one test (§4.6). The runner's own
/// resource discovery only sees default-filesystem paths, so the in-memory
/// feature directory is materialized to a real temp directory first; the
/// bridge never rewrites the staging filesystem's own identity.
pub struct GherkinBridge;

impl GherkinBridge {
    pub async fn run(
        test_id: TestId,
        fs: Arc<StagingFs>,
        streams: Arc<StreamIndex>,
        features_root: &str,
    ) -> ProbeResult<TestResult> {
        let tmp = TempDir::new()
            .map_err(|err| ProbeError::new(ErrorCode::Cucumber, format!("failed to materialize workspace: {err}")))?;
        materialize(&fs, features_root, tmp.path())?;

        let scenario_count = count_scenarios(tmp.path())?;
        let started = Instant::now();

        let active = ActiveTest { test_id, streams };
        let features_path = tmp.path().to_path_buf();
        let summary = ACTIVE_TEST
            .scope(active, async move {
                ProbeWorld::cucumber()
                    .max_concurrent_scenarios(Some(1))
                    .with_writer(writer::Summarize::new(writer::Basic::stdout()))
                    .run(features_path)
                    .await
            })
            .await;

        let failed_steps = summary.failed_steps() as u32;
        let scenarios_failed = if failed_steps > 0 { failed_steps.min(scenario_count).max(1) } else { 0 };
        let scenarios_passed = scenario_count.saturating_sub(scenarios_failed);

        Ok(TestResult {
            scenario_count,
            scenarios_passed,
            scenarios_failed,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn materialize(fs: &StagingFs, features_root: &str, dest: &Path) -> ProbeResult<()> {
    for path in fs.list_under(features_root) {
        let relative = path.trim_start_matches(features_root).trim_start_matches('/');
        let dest_path = dest.join(relative);
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| ProbeError::new(ErrorCode::Cucumber, format!("materialize failed: {err}")))?;
        }
        let bytes = fs
            .read_file(&path)
            .ok_or_else(|| ProbeError::new(ErrorCode::Cucumber, format!("materialize read failed: {path} vanished mid-copy")))?;
        std::fs::write(&dest_path, bytes)
            .map_err(|err| ProbeError::new(ErrorCode::Cucumber, format!("materialize write failed: {err}")))?;
    }
    Ok(())
}

fn count_scenarios(root: &Path) -> ProbeResult<u32> {
    let mut count = 0u32;
    for entry in walkdir(root) {
        if entry.extension().and_then(|e| e.to_str()) == Some("feature") {
            let feature = gherkin::Feature::parse_path(&entry, gherkin::GherkinEnv::default())
                .map_err(|err| ProbeError::new(ErrorCode::Cucumber, format!("feature parse failed: {err}")))?;
            count += feature.scenarios.len() as u32;
            for rule in &feature.rules {
                count += rule.scenarios.len() as u32;
            }
        }
    }
    Ok(count)
}

fn walkdir(root: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
