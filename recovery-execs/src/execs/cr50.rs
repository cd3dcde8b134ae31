// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cr50/GSC health execs based on SBU line voltages.

use crate::error::ExecError;
use crate::info::ExecInfo;
use futures::future::BoxFuture;
use futures::FutureExt;
use servo_comms::get_double;
use servo_comms::Servod;
use slog::debug;
use tokio_util::sync::CancellationToken;

// Sideband-use rails reported by servod, in millivolts.
const SBU_RAILS: [&str; 2] = ["servo_dut_sbu1_mv", "servo_dut_sbu2_mv"];

// SBU voltage at or above this level is enough for the cr50 to enumerate.
const SBU_THRESHOLD_MV: f64 = 2500.0;

// Single reads are noisy; average this many samples per rail.
const READS_PER_RAIL: usize = 10;

/// Average each SBU rail over several reads and return the higher average.
async fn max_avg_sbu_mv(
    servod: &dyn Servod,
    cancel: &CancellationToken,
) -> Result<f64, ExecError> {
    let mut max_avg = 0.0f64;
    for rail in SBU_RAILS {
        let mut total = 0.0;
        for _ in 0..READS_PER_RAIL {
            total += get_double(servod, cancel, rail).await?;
        }
        max_avg = max_avg.max(total / READS_PER_RAIL as f64);
    }
    Ok(max_avg)
}

/// Fail when the SBU voltage is too low for the cr50 to enumerate.
pub fn cr50_low_sbu(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let servod = info.new_servod().await?;
        let voltage = max_avg_sbu_mv(servod.as_ref(), info.cancel()).await?;
        debug!(info.log(), "read SBU voltage"; "mv" => voltage);
        if voltage < SBU_THRESHOLD_MV {
            return Err(ExecError::failed(format!(
                "sbu voltage is {voltage:.1} mV, below the \
                 {SBU_THRESHOLD_MV} mV enumeration threshold"
            )));
        }
        Ok(())
    }
    .boxed()
}

/// Fail when the SBU voltage is high enough to enumerate the cr50; runs only
/// when the cr50 is known to be missing from the servo type.
pub fn cr50_enumerated(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let servod = info.new_servod().await?;
        let voltage = max_avg_sbu_mv(servod.as_ref(), info.cancel()).await?;
        debug!(info.log(), "read SBU voltage"; "mv" => voltage);
        if voltage >= SBU_THRESHOLD_MV {
            return Err(ExecError::failed(format!(
                "sbu voltage is {voltage:.1} mV but the cr50 did not \
                 enumerate"
            )));
        }
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::dual_dut;
    use crate::testutil::exec_info_with;
    use crate::testutil::FakeAccess;
    use servod_protocol::Value;
    use std::sync::Arc;

    fn access_with_sbu(sbu1: f64, sbu2: f64) -> Arc<FakeAccess> {
        let access = Arc::new(FakeAccess::default());
        access.servod.get_returns("servo_dut_sbu1_mv", vec![Value::Double(sbu1)]);
        access.servod.get_returns("servo_dut_sbu2_mv", vec![Value::Double(sbu2)]);
        access
    }

    #[tokio::test]
    async fn low_sbu_passes_when_either_rail_is_high() {
        let mut info =
            exec_info_with(dual_dut(), access_with_sbu(90.0, 2800.0), &[]);
        cr50_low_sbu(&mut info).await.unwrap();
    }

    #[tokio::test]
    async fn low_sbu_fails_when_both_rails_are_low() {
        let mut info =
            exec_info_with(dual_dut(), access_with_sbu(90.0, 110.0), &[]);
        let err = cr50_low_sbu(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)), "{err}");
    }

    #[tokio::test]
    async fn enumerated_fails_when_voltage_is_good() {
        let mut info =
            exec_info_with(dual_dut(), access_with_sbu(2650.0, 40.0), &[]);
        let err = cr50_enumerated(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)), "{err}");
    }

    #[tokio::test]
    async fn rails_are_averaged_over_repeated_reads() {
        let access = Arc::new(FakeAccess::default());
        // First read spikes high; the average over ten reads stays low.
        let mut reads = vec![Value::Double(6000.0)];
        reads.extend((0..9).map(|_| Value::Double(100.0)));
        access.servod.get_returns("servo_dut_sbu1_mv", reads);
        access.servod.get_returns("servo_dut_sbu2_mv", vec![Value::Double(0.0)]);
        let mut info = exec_info_with(dual_dut(), access, &[]);
        let err = cr50_low_sbu(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)), "{err}");
    }
}
