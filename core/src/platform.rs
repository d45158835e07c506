//! External interfaces consumed from the architecture layer (§6).
//!
//! Everything here is a thin, `no_std`-friendly registration point rather
//! than a trait object: the same `AtomicPtr`-dispatched-function-pointer
//! idiom `nanopod_lib::irq`/`nanopod_lib::klog` use for their own
//! architecture hooks (IRQ mask primitives, console backend). The core
//! never assumes a specific CPU architecture is linked in; until the
//! embedding kernel calls the relevant `register_*` function, the
//! corresponding operation is a safe no-op (or, where the spec allows it,
//! reported as [`nanopod_abi::PodError::Nosys`]).
//!
//! Architecture-specific context-switch assembly, FPU save/restore, and
//! interrupt-pipeline routing are explicitly out of scope (§1); what's
//! modeled here is only the *call shape* the pod needs at the boundary.

use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use nanopod_abi::ThreadId;

/// Fault/trap information exposed to `trap_fault` (§6, §4.8): program
/// counter and trap vector. The architecture layer constructs this from
/// whatever raw exception frame it owns; no raw frame pointer crosses into
/// this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultInfo {
    pub pc: u64,
    pub vector: u32,
}

/// Opaque handle to a host-kernel task, used only for shadow pairing
/// (§4.7). The core never dereferences this; it is passed back verbatim to
/// the host-task callbacks registered via [`register_host_task_ops`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct HostTaskId(pub u64);

pub type ContextSwitchFn = fn(outgoing: ThreadId, incoming: ThreadId);
pub type FpuSwitchFn = fn(outgoing: Option<ThreadId>, incoming: ThreadId);
pub type SendIpiFn = fn(cpu: usize);
/// Reprograms the one-shot timer to fire `ns` nanoseconds from now.
/// Returns `false` if the architecture has no one-shot-programmable timer
/// (aperiodic mode is then [`nanopod_abi::PodError::Nosys`] at `init` time).
pub type ProgramOneShotFn = fn(ns: u64) -> bool;
pub type ProgramPeriodicFn = fn(tick_ns: u64);
/// Delivers one relay tick to the host OS at its native period (periodic
/// mode only — §4.3 "a relay tick delivered to the host OS at its native
/// period").
pub type RelayHostTickFn = fn();

pub type HostRunFn = fn(HostTaskId);
pub type HostSignalFn = fn(HostTaskId, u32);
pub type HostSetFixedPriorityFn = fn(HostTaskId, i32);
pub type HostWakeFn = fn(HostTaskId);

/// Interposes the shielding domain between host IRQ delivery and the host
/// domain (§4.7 "Interrupt shielding"): external IRQs are pended rather than
/// delivered while any shadow runs in the host domain.
pub type ShieldEnableFn = fn();
/// Tears the shield back down and replays whatever IRQs it pended, called
/// once the last shadow has left the host domain.
pub type ShieldDisableFn = fn();

macro_rules! hook_slot {
    ($static_name:ident, $fn_ty:ty) => {
        static $static_name: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
    };
}

hook_slot!(CONTEXT_SWITCH, ContextSwitchFn);
hook_slot!(FPU_SWITCH, FpuSwitchFn);
hook_slot!(SEND_IPI, SendIpiFn);
hook_slot!(PROGRAM_ONE_SHOT, ProgramOneShotFn);
hook_slot!(PROGRAM_PERIODIC, ProgramPeriodicFn);
hook_slot!(RELAY_HOST_TICK, RelayHostTickFn);
hook_slot!(HOST_RUN, HostRunFn);
hook_slot!(HOST_SIGNAL, HostSignalFn);
hook_slot!(HOST_SET_FIXED_PRIORITY, HostSetFixedPriorityFn);
hook_slot!(HOST_WAKE, HostWakeFn);
hook_slot!(SHIELD_ENABLE, ShieldEnableFn);
hook_slot!(SHIELD_DISABLE, ShieldDisableFn);

static APERIODIC_SUPPORTED: AtomicBool = AtomicBool::new(false);

macro_rules! register_fn {
    ($name:ident, $slot:ident, $fn_ty:ty) => {
        pub fn $name(f: $fn_ty) {
            $slot.store(f as *mut (), Ordering::Release);
        }
    };
}

register_fn!(register_context_switch, CONTEXT_SWITCH, ContextSwitchFn);
register_fn!(register_fpu_switch, FPU_SWITCH, FpuSwitchFn);
register_fn!(register_send_ipi, SEND_IPI, SendIpiFn);
register_fn!(register_relay_host_tick, RELAY_HOST_TICK, RelayHostTickFn);
register_fn!(register_host_run, HOST_RUN, HostRunFn);
register_fn!(register_host_signal, HOST_SIGNAL, HostSignalFn);
register_fn!(
    register_host_set_fixed_priority,
    HOST_SET_FIXED_PRIORITY,
    HostSetFixedPriorityFn
);
register_fn!(register_host_wake, HOST_WAKE, HostWakeFn);
register_fn!(register_shield_enable, SHIELD_ENABLE, ShieldEnableFn);
register_fn!(register_shield_disable, SHIELD_DISABLE, ShieldDisableFn);

/// Registers the architecture's one-shot timer and marks aperiodic mode
/// available. Without this call, [`program_one_shot`] always reports
/// unsupported and `pod::init` with aperiodic mode requested returns
/// [`nanopod_abi::PodError::Nosys`].
pub fn register_one_shot_timer(f: ProgramOneShotFn) {
    PROGRAM_ONE_SHOT.store(f as *mut (), Ordering::Release);
    APERIODIC_SUPPORTED.store(true, Ordering::Release);
}

pub fn register_periodic_timer(f: ProgramPeriodicFn) {
    PROGRAM_PERIODIC.store(f as *mut (), Ordering::Release);
}

pub fn aperiodic_supported() -> bool {
    APERIODIC_SUPPORTED.load(Ordering::Acquire)
}

macro_rules! call_opt {
    ($slot:ident, $fn_ty:ty, $($arg:expr),*) => {{
        let ptr = $slot.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            let f: $fn_ty = unsafe { core::mem::transmute(ptr) };
            Some(f($($arg),*))
        }
    }};
}

pub fn context_switch(outgoing: ThreadId, incoming: ThreadId) {
    call_opt!(CONTEXT_SWITCH, ContextSwitchFn, outgoing, incoming);
}

pub fn fpu_switch(outgoing: Option<ThreadId>, incoming: ThreadId) {
    call_opt!(FPU_SWITCH, FpuSwitchFn, outgoing, incoming);
}

pub fn send_ipi(cpu: usize) {
    call_opt!(SEND_IPI, SendIpiFn, cpu);
}

pub fn program_one_shot(ns: u64) -> bool {
    call_opt!(PROGRAM_ONE_SHOT, ProgramOneShotFn, ns).unwrap_or(false)
}

pub fn program_periodic(tick_ns: u64) {
    call_opt!(PROGRAM_PERIODIC, ProgramPeriodicFn, tick_ns);
}

pub fn relay_host_tick() {
    call_opt!(RELAY_HOST_TICK, RelayHostTickFn,);
}

pub fn host_run(task: HostTaskId) {
    call_opt!(HOST_RUN, HostRunFn, task);
}

pub fn host_signal(task: HostTaskId, signal: u32) {
    call_opt!(HOST_SIGNAL, HostSignalFn, task, signal);
}

pub fn host_set_fixed_priority(task: HostTaskId, prio: i32) {
    call_opt!(HOST_SET_FIXED_PRIORITY, HostSetFixedPriorityFn, task, prio);
}

pub fn host_wake(task: HostTaskId) {
    call_opt!(HOST_WAKE, HostWakeFn, task);
}

pub fn shield_enable() {
    call_opt!(SHIELD_ENABLE, ShieldEnableFn,);
}

pub fn shield_disable() {
    call_opt!(SHIELD_DISABLE, ShieldDisableFn,);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_shot_stub(_ns: u64) -> bool {
        true
    }

    #[test]
    fn aperiodic_unsupported_until_registered() {
        // NB: process-global statics persist across tests in the same
        // binary; this only asserts the call shape compiles and returns a
        // bool, not the initial state (test order is not guaranteed).
        let _ = aperiodic_supported();
        register_one_shot_timer(one_shot_stub);
        assert!(aperiodic_supported());
        assert!(program_one_shot(1000));
    }
}
