//! Property tests for capability inference and the text frame encoder

use proptest::prelude::*;
use refclk_core::chardev::format_time_str;
use refclk_core::features::{check_feature, FeatureSet, FeatureType, PcpsFeatures};
use refclk_core::mock::{self, ClockModel};
use refclk_core::types::{Time, TimeStatus, TlvInfo, XFeatures};

/// A feature gated on a firmware revision is reported iff the probed
/// revision meets the threshold (PCI511 gains HR time at v1.03).
#[test]
fn firmware_gate_threshold_is_exact() {
    for (major, minor, expect) in [
        (1u8, 0u8, false),
        (1, 2, false),
        (1, 3, true),
        (1, 4, true),
        (2, 0, true),
    ] {
        let mut model = ClockModel::pci511();
        model.fw_id = format!("PCI511 v{}.{:02}", major, minor);
        let fix = mock::asic_fixture(model);
        let cfg = fix.dev.cfg.read();
        assert_eq!(
            cfg.features.contains(PcpsFeatures::HAS_HR_TIME),
            expect,
            "firmware v{}.{:02}",
            major,
            minor
        );
    }
}

/// The builtin feature mask reported to callers is always a subset of
/// the per-model default mask.
#[test]
fn real_builtin_features_subset_of_default() {
    for model in [
        ClockModel::gps180pex(),
        ClockModel::pci511(),
        ClockModel::pex511_old_firmware(),
    ] {
        let fix = mock::asic_fixture(model);
        let cfg = fix.dev.cfg.read();
        assert_eq!(
            cfg.real_builtin_features & cfg.default_builtin_features,
            cfg.real_builtin_features
        );
    }
}

proptest! {
    /// Every valid builtin query answered true implies membership in
    /// both masks.
    #[test]
    fn builtin_predicate_implies_masks(bit in 0u16..3) {
        let fix = mock::asic_fixture(ClockModel::gps180pex());
        let cfg = fix.dev.cfg.read();
        let xf = XFeatures::empty();
        let tlv = TlvInfo::empty();
        let set = FeatureSet {
            real_builtin: cfg.real_builtin_features,
            ref_class: refclk_core::device::RefClass::Gps,
            pcps: cfg.features,
            ri_features: 0,
            xfeatures: &xf,
            tlv_info: &tlv,
        };
        if check_feature(&set, FeatureType::Builtin, bit).unwrap() {
            prop_assert!(cfg.real_builtin_features.bits() & (1 << bit) != 0);
            prop_assert!(cfg.default_builtin_features.bits() & (1 << bit) != 0);
        }
    }

    /// The text frame is always exactly 32 visible bytes, STX/ETX
    /// framed, for any in-range time.
    #[test]
    fn time_frame_shape(
        sec in 0u8..61,
        min in 0u8..60,
        hour in 0u8..24,
        mday in 1u8..32,
        wday in 1u8..8,
        month in 1u8..13,
        year in 0u8..100,
        status_bits in any::<u8>(),
        offs_utc in -12i8..13,
    ) {
        let t = Time {
            sec100: 0,
            sec,
            min,
            hour,
            mday,
            wday,
            month,
            year,
            status: TimeStatus::from_bits_retain(status_bits),
            signal: 50,
            offs_utc,
        };
        let frame = format_time_str(&t, false);
        prop_assert_eq!(frame[0], 0x02);
        prop_assert_eq!(frame[31], 0x03);
        prop_assert_eq!(frame[32], 0);
        // Field separators stay put for any input.
        prop_assert_eq!(frame[11], b';');
        prop_assert_eq!(frame[15], b';');
        prop_assert_eq!(frame[26], b';');
    }

    /// An out-of-range feature number is always rejected, never
    /// silently false.
    #[test]
    fn feature_predicate_rejects_out_of_range(num in 32u16..512) {
        let xf = XFeatures::empty();
        let tlv = TlvInfo::empty();
        let set = FeatureSet {
            real_builtin: Default::default(),
            ref_class: refclk_core::device::RefClass::Dcf,
            pcps: PcpsFeatures::empty(),
            ri_features: 0,
            xfeatures: &xf,
            tlv_info: &tlv,
        };
        prop_assert!(check_feature(&set, FeatureType::Pcps, num).is_err());
        prop_assert!(check_feature(&set, FeatureType::Ri, num).is_err());
    }
}
