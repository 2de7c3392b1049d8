//! ModeSelector — decides per-request which DataEncryptor variant to use.

/// The two mutually incompatible DataEncryptor variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Gcm,
    Ctr,
}

const FORCE_GCM_CONTENT_TYPE: &str = "application/x-s3ep-force-aes-gcm";
const FORCE_CTR_CONTENT_TYPE: &str = "application/x-s3ep-force-aes-ctr";

/// `content_length < 0` means unknown; treated as below threshold unless multipart.
pub fn select_mode(
    content_type: &str,
    content_length: i64,
    is_multipart: bool,
    streaming_threshold: u64,
) -> Mode {
    if content_type == FORCE_GCM_CONTENT_TYPE {
        return Mode::Gcm;
    }
    if content_type == FORCE_CTR_CONTENT_TYPE {
        return Mode::Ctr;
    }
    if is_multipart {
        return Mode::Ctr;
    }
    if content_length >= 0 && content_length as u64 >= streaming_threshold {
        return Mode::Ctr;
    }
    Mode::Gcm
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: u64 = 50 * 1024 * 1024;

    #[test]
    fn forced_gcm_beats_multipart_heuristic() {
        assert_eq!(
            select_mode(FORCE_GCM_CONTENT_TYPE, 0, true, THRESHOLD),
            Mode::Gcm
        );
    }

    #[test]
    fn forced_ctr_overrides_small_content_length() {
        assert_eq!(
            select_mode(FORCE_CTR_CONTENT_TYPE, 10, false, THRESHOLD),
            Mode::Ctr
        );
    }

    #[test]
    fn multipart_always_selects_ctr() {
        assert_eq!(select_mode("application/octet-stream", 0, true, THRESHOLD), Mode::Ctr);
    }

    #[test]
    fn boundary_at_exactly_threshold_selects_ctr() {
        let t = THRESHOLD as i64;
        assert_eq!(select_mode("x", t - 1, false, THRESHOLD), Mode::Gcm);
        assert_eq!(select_mode("x", t, false, THRESHOLD), Mode::Ctr);
    }

    #[test]
    fn unknown_length_treated_as_below_threshold_unless_multipart() {
        assert_eq!(select_mode("x", -1, false, THRESHOLD), Mode::Gcm);
        assert_eq!(select_mode("x", -1, true, THRESHOLD), Mode::Ctr);
    }
}
