//! Exercises the derive through the same shapes the configuration layer
//! wraps: a confirmed-commit window, an informational apply threshold, and
//! a collected-config size bound.

use otto_bgp_macros::WrapperWithDefault;
use std::time::Duration;

const DEFAULT_CONFIRM_WINDOW: Duration = Duration::from_secs(120);
const DEFAULT_AUTO_APPLY_THRESHOLD: u32 = 100;
const DEFAULT_MAX_CONFIG_SIZE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, WrapperWithDefault)]
#[wrapper_default_value(DEFAULT_CONFIRM_WINDOW)]
struct ConfirmWindow(Duration);

#[derive(Debug, Clone, Copy, PartialEq, Eq, WrapperWithDefault)]
#[wrapper_default_value(DEFAULT_AUTO_APPLY_THRESHOLD)]
struct AutoApplyThreshold(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, WrapperWithDefault)]
#[wrapper_default_value(DEFAULT_MAX_CONFIG_SIZE_BYTES)]
struct MaxConfigSize(usize);

#[test]
fn defaults_come_from_the_named_constants() {
    assert_eq!(Duration::from(ConfirmWindow::default()), DEFAULT_CONFIRM_WINDOW);
    assert_eq!(u32::from(AutoApplyThreshold::default()), DEFAULT_AUTO_APPLY_THRESHOLD);
    assert_eq!(usize::from(MaxConfigSize::default()), DEFAULT_MAX_CONFIG_SIZE_BYTES);
}

#[test]
fn conversions_round_trip_through_the_wrapper() {
    let window: ConfirmWindow = Duration::from_secs(60).into();
    assert_eq!(Duration::from(window), Duration::from_secs(60));

    let threshold: AutoApplyThreshold = 7u32.into();
    assert_eq!(u32::from(threshold), 7);
}

#[test]
fn overlay_merge_shape_falls_back_to_the_default() {
    // The config store merges optional overlay values exactly like this:
    // present values convert in, absent ones keep the documented default.
    fn merge(overlay: Option<u32>) -> AutoApplyThreshold {
        overlay.map(Into::into).unwrap_or_default()
    }

    assert_eq!(u32::from(merge(Some(5))), 5);
    assert_eq!(u32::from(merge(None)), DEFAULT_AUTO_APPLY_THRESHOLD);
}

#[test]
fn wrapped_values_stay_comparable() {
    let small: MaxConfigSize = 512usize.into();
    let default = MaxConfigSize::default();
    assert_ne!(small, default);
    assert!(usize::from(small) < usize::from(default));
}
