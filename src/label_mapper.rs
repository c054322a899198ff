/// Judgment value to support-level label mapping
///
/// The sensor reports a small integer judgment per record. It is folded into one of six
/// labels; 6 is the catch-all for anything outside the table.

use std::fmt;

/// Default label for judgments outside the table (negative, above 11, or too large for i64)
pub const DEFAULT_LABEL: Label = Label(6);

/// Support-level label in 1..=6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u8);

impl Label {
    pub fn from_judgment(val: i64) -> Self {
        match val {
            0 | 1 => Label(5),
            2..=4 => Label(4),
            5..=7 => Label(3),
            8 | 9 => Label(2),
            10 | 11 => Label(1),
            _ => DEFAULT_LABEL,
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn as_str(self) -> &'static str {
        match self.0 {
            1 => "1",
            2 => "2",
            3 => "3",
            4 => "4",
            5 => "5",
            _ => "6",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a judgment value to its label text. Total over i64.
pub fn map_value(val: i64) -> &'static str {
    Label::from_judgment(val).as_str()
}
