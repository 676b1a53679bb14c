//! Gesture indication derivation (spec §4.1). Thresholds and counts are the
//! protocol's documented constants, not tunables.

/// Pitch/roll/yaw magnitude below which the wearer is considered neutral.
const T: i32 = 1200;
/// Consecutive left-tilt packets required to emit a left indication outright.
const L_ACT: u32 = 5;
/// Consecutive right-tilt packets required to emit a right indication outright.
const R_ACT: u32 = 8;
/// Consecutive neutral packets required to arm (disable) the reduced window.
const N_ACT: u32 = 8;
/// Reduced left-tilt count sufficient within the reduced window.
const L_R: u32 = 4;
/// Reduced right-tilt count sufficient within the reduced window.
const R_R: u32 = 4;
/// Width of the reduced-threshold window, in milliseconds.
const W_MS: i64 = 6_000;

/// Per-session gesture state. Carried across IMU packets for the lifetime
/// of a session; reset implicitly by constructing a fresh value on
/// reconnect (sessions never reuse a prior `GestureState`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureState {
    pub left_indication: u32,
    pub right_indication: u32,
    pub not_sent_indication: u32,
    pub last_sent_at: i64,
    pub left_sent: u64,
    pub right_sent: u64,
}

impl Default for GestureState {
    fn default() -> Self {
        GestureState {
            left_indication: 0,
            right_indication: 0,
            not_sent_indication: 0,
            last_sent_at: 0,
            left_sent: 0,
            right_sent: 0,
        }
    }
}

impl GestureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A Liveness frame asserts the wearer is still; it resets both
    /// directional counters but leaves `not_sent_indication` untouched —
    /// the spec treats those as independently tracked.
    pub fn reset_directional(&mut self) {
        self.left_indication = 0;
        self.right_indication = 0;
    }

    /// Derive a movement indication from one IMU packet, returning
    /// `-1`/`0`/`+1` and mutating internal counters per spec §4.1.
    pub fn derive(&mut self, pitch: i16, roll: i16, yaw: i16, now_ms: i64) -> i8 {
        let (pitch, roll, yaw) = (pitch as i32, roll as i32, yaw as i32);

        if pitch.abs() < T {
            self.left_indication = 0;
            self.right_indication = 0;
            self.not_sent_indication += 1;
            if self.not_sent_indication >= N_ACT {
                self.last_sent_at = 0;
            }
            return 0;
        }

        if pitch < -T && roll.abs() < T && yaw.abs() < T {
            self.right_indication = 0;
            self.not_sent_indication = 0;
            self.left_indication += 1;

            let within_window = now_ms - self.last_sent_at < W_MS;
            let emit = (within_window && self.left_indication >= L_R) || self.left_indication >= L_ACT;
            if emit {
                self.last_sent_at = now_ms;
                self.left_sent += 1;
                return -1;
            }
            return 0;
        }

        if pitch > T && roll.abs() < T && yaw.abs() < T {
            self.left_indication = 0;
            self.not_sent_indication = 0;
            self.right_indication += 1;

            let within_window = now_ms - self.last_sent_at < W_MS;
            let emit = (within_window && self.right_indication >= R_R) || self.right_indication >= R_ACT;
            if emit {
                self.last_sent_at = now_ms;
                self.right_sent += 1;
                return 1;
            }
            return 0;
        }

        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_gesture_emits_on_fifth_packet() {
        let mut g = GestureState::new();
        let mut last = 0;
        for i in 0..5 {
            last = g.derive(-2000, 100, 50, 1_000 + i * 10);
        }
        assert_eq!(last, -1);
        assert_eq!(g.left_sent, 1);
        assert_eq!(g.right_indication, 0);
    }

    #[test]
    fn neutral_packet_resets_directional_counters() {
        let mut g = GestureState::new();
        g.derive(-2000, 100, 50, 0);
        g.derive(-2000, 100, 50, 10);
        assert!(g.left_indication > 0);
        g.derive(0, 0, 0, 20);
        assert_eq!(g.left_indication, 0);
        assert_eq!(g.right_indication, 0);
    }

    #[test]
    fn left_and_right_never_both_positive() {
        let mut g = GestureState::new();
        g.derive(-2000, 0, 0, 0);
        assert!(!(g.left_indication > 0 && g.right_indication > 0));
        g.derive(2000, 0, 0, 10);
        assert!(!(g.left_indication > 0 && g.right_indication > 0));
    }

    #[test]
    fn reduced_window_reemits_while_still_tilted() {
        let mut g = GestureState::new();
        for i in 0..5 {
            g.derive(-2000, 0, 0, i * 10);
        }
        assert_eq!(g.left_sent, 1);
        // left_indication is already >= L_ACT and is never reset by a
        // same-direction packet, so every further tilted packet re-emits.
        let last = g.derive(-2000, 0, 0, 100);
        assert_eq!(last, -1);
        assert_eq!(g.left_sent, 2);
    }

    #[test]
    fn not_sent_indication_arms_reduced_window_disable() {
        let mut g = GestureState::new();
        g.last_sent_at = 12_345;
        for i in 0..N_ACT {
            g.derive(0, 0, 0, i as i64);
        }
        assert_eq!(g.last_sent_at, 0);
    }
}
