// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::ExecError;
use crate::error::ExecFailure;
use crate::execs;
use crate::info::ExecInfo;
use futures::future::BoxFuture;
use std::collections::BTreeMap;

/// One exec: borrows the invocation context for the duration of the call.
pub type ExecFn =
    for<'a> fn(&'a mut ExecInfo) -> BoxFuture<'a, Result<(), ExecError>>;

/// Collects name→exec registrations at program entry.
#[derive(Default)]
pub struct RegistryBuilder {
    execs: BTreeMap<&'static str, ExecFn>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering two execs under one name is a programming error.
    pub fn register(mut self, name: &'static str, exec: ExecFn) -> Self {
        let prev = self.execs.insert(name, exec);
        assert!(prev.is_none(), "exec {name:?} registered twice");
        self
    }

    pub fn build(self) -> Registry {
        Registry { execs: self.execs }
    }
}

/// Immutable name→exec map; lookup is read-only and shareable across tasks.
pub struct Registry {
    execs: BTreeMap<&'static str, ExecFn>,
}

impl Registry {
    pub fn contains(&self, name: &str) -> bool {
        self.execs.contains_key(name)
    }

    /// Registered exec names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.execs.keys().copied()
    }

    /// Run the named exec, surfacing its error annotated with the name.
    pub async fn run(
        &self,
        name: &str,
        info: &mut ExecInfo,
    ) -> Result<(), ExecFailure> {
        let Some(exec) = self.execs.get(name) else {
            return Err(ExecFailure {
                exec: name.to_string(),
                err: ExecError::UnknownExec(name.to_string()),
            });
        };
        exec(info).await.map_err(|err| ExecFailure {
            exec: name.to_string(),
            err,
        })
    }
}

/// The full exec library under its canonical names.
pub fn standard_registry() -> Registry {
    RegistryBuilder::new()
        .register("servo_host_servod_init", execs::servod_host::servod_init)
        .register("servo_host_servod_stop", execs::servod_host::servod_stop)
        .register(
            "servo_host_servod_restart",
            execs::servod_host::servod_restart,
        )
        .register(
            "servo_servod_echo_host",
            execs::servod_host::servod_echo_host,
        )
        .register("servo_host_v3_reboot", execs::servod_host::host_v3_reboot)
        .register("servo_detect_usbkey", execs::usbkey::detect_usbkey)
        .register("servo_audit_usbkey", execs::usbkey::audit_usbkey)
        .register("servo_cr50_low_sbu", execs::cr50::cr50_low_sbu)
        .register("servo_cr50_enumerated", execs::cr50::cr50_enumerated)
        .register("servo_topology_update", execs::topology::topology_update)
        .register("servo_v4_root_present", execs::topology::root_present)
        .register("servo_set_servo_state", execs::state::set_servo_state)
        .register("servo_match_state", execs::state::match_state)
        .register("servo_servod_toggle_pd_role", execs::power::toggle_pd_role)
        .register("servo_recover_ac_power", execs::power::recover_ac_power)
        .register(
            "servo_trigger_kernel_panic",
            execs::power::trigger_kernel_panic,
        )
        .register("servo_power_state_reset", execs::power::power_state_reset)
        .register("servo_set_ec_uart_cmd", execs::power::set_ec_uart_command)
        .register(
            "servo_battery_charging",
            execs::power::validate_battery_charging,
        )
        .register(
            "servo_power_cycle_root_servo",
            execs::power::power_cycle_root_servo,
        )
        .register("servo_fw_need_update", execs::firmware::fw_need_update)
        .register(
            "servo_update_servo_firmware",
            execs::firmware::update_servo_firmware,
        )
        .register("servo_set", execs::control::servo_set)
        .register("servo_low_ppdut5", execs::control::low_ppdut5)
        .register(
            "servo_check_servod_control",
            execs::control::check_servod_control,
        )
        .register("init_dut_for_servo", execs::control::init_dut_for_servo)
        .register(
            "servo_fake_disconnect_dut",
            execs::control::fake_disconnect_dut,
        )
        .register("servo_servod_cc_toggle", execs::control::servod_cc_toggle)
        .register("cros_collect_servod_logs", execs::logs::collect_servod_logs)
        .register(
            "servo_servod_old_logs_cleanup",
            execs::logs::servod_old_logs_cleanup,
        )
        .register(
            "servo_labstation_disk_cleanup",
            execs::logs::labstation_disk_cleanup,
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_is_complete_and_sorted() {
        let registry = standard_registry();
        for name in [
            "servo_host_servod_init",
            "servo_host_servod_stop",
            "servo_host_servod_restart",
            "servo_host_v3_reboot",
            "servo_detect_usbkey",
            "servo_audit_usbkey",
            "servo_cr50_low_sbu",
            "servo_cr50_enumerated",
            "servo_topology_update",
            "servo_v4_root_present",
            "servo_set_servo_state",
            "servo_match_state",
            "servo_servod_toggle_pd_role",
            "servo_recover_ac_power",
            "servo_trigger_kernel_panic",
            "servo_set_ec_uart_cmd",
            "servo_battery_charging",
            "servo_fw_need_update",
            "servo_update_servo_firmware",
            "cros_collect_servod_logs",
            "servo_labstation_disk_cleanup",
        ] {
            assert!(registry.contains(name), "{name} not registered");
        }
        let names: Vec<_> = registry.names().collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn unknown_exec_is_reported_by_name() {
        let registry = RegistryBuilder::new().build();
        let mut info = crate::testutil::exec_info(crate::testutil::dual_dut());
        let err = registry.run("no_such_exec", &mut info).await.unwrap_err();
        assert_eq!(err.exec, "no_such_exec");
        assert!(matches!(err.err, ExecError::UnknownExec(_)));
    }
}
