//! Stage loop of one pipeline pass.

use contracts::{EngineResult, FrameInput, FullParams, PrepareParams};
use observability::record_algo_failure;
use tracing::{trace, warn};

use crate::registry::{lock_context, ActiveHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    PreProcess,
    Processing,
    PostProcess,
}

impl Stage {
    const ORDER: [Stage; 3] = [Stage::PreProcess, Stage::Processing, Stage::PostProcess];

    fn name(self) -> &'static str {
        match self {
            Stage::PreProcess => "pre_process",
            Stage::Processing => "processing",
            Stage::PostProcess => "post_process",
        }
    }
}

/// Outcome of [`run_stages`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Handles that took part in the pass
    pub handles: usize,
    /// Handles that failed one of their stages
    pub failed: usize,
}

/// Run every stage across `handles`
///
/// Each stage runs on every handle before the next stage starts. A handle
/// whose stage fails is skipped for the rest of the pass; the others go on.
pub fn run_stages(
    handles: &[ActiveHandle],
    input: &FrameInput<'_>,
    output: &mut FullParams,
) -> StageOutcome {
    let mut failed = vec![false; handles.len()];

    for stage in Stage::ORDER {
        for (handle, failed) in handles.iter().zip(failed.iter_mut()) {
            if *failed {
                continue;
            }
            let mut algo = lock_context(&handle.context);
            let result = match stage {
                Stage::PreProcess => algo.pre_process(input),
                Stage::Processing => algo.processing(input, output),
                Stage::PostProcess => algo.post_process(input, output),
            };
            if let Err(e) = result {
                *failed = true;
                record_algo_failure(handle.algo, stage.name());
                warn!(
                    frame_id = input.frame_id,
                    algo = %handle.algo,
                    id = handle.id,
                    stage = stage.name(),
                    error = %e,
                    "algorithm stage failed, skipping its remaining stages"
                );
            }
        }
        trace!(frame_id = input.frame_id, stage = stage.name(), "stage done");
    }

    StageOutcome {
        handles: handles.len(),
        failed: failed.iter().filter(|f| **f).count(),
    }
}

/// Prepare every handle, stopping at the first failure
pub fn prepare_all(handles: &[ActiveHandle], params: &PrepareParams) -> EngineResult<()> {
    for handle in handles {
        let result = lock_context(&handle.context).prepare(params);
        if let Err(e) = result {
            warn!(algo = %handle.algo, id = handle.id, error = %e, "algorithm prepare failed");
            return Err(e);
        }
    }
    Ok(())
}
