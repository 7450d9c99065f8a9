/// Highest playable pitch (B-7).
pub const MAX_PITCH: u8 = 95;

const NAMES: [&str; 12] = [
    "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#", "A-", "A#", "B-",
];

/// Tracker-style name of a pitch, e.g. `C-4` for 48.
pub fn note_name(pitch: u8) -> String {
    format!("{}{}", NAMES[(pitch % 12) as usize], pitch / 12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(note_name(0), "C-0");
        assert_eq!(note_name(48), "C-4");
        assert_eq!(note_name(57), "A-4");
        assert_eq!(note_name(MAX_PITCH), "B-7");
    }
}
