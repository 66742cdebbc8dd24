// =============================================================================
// Game Boy Action Space
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Button {
    Noop = 0,
    A = 1,
    B = 2,
    Select = 3,
    Start = 4,
    Right = 5,
    Left = 6,
    Up = 7,
    Down = 8,
}

impl Button {
    pub const COUNT: usize = 9;

    pub const ALL: [Button; Button::COUNT] = [
        Button::Noop,
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
    ];

    pub fn from_index(i: i32) -> Option<Self> {
        usize::try_from(i).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Joypad register bits: A=0x01 B=0x02 SELECT=0x04 START=0x08
    /// RIGHT=0x10 LEFT=0x20 UP=0x40 DOWN=0x80.
    pub fn key_mask(self) -> u8 {
        match self {
            Button::Noop => 0,
            other => 1 << (other as u8 - 1),
        }
    }
}

/// Key mask for a raw discrete action. Out-of-range values press nothing.
pub fn key_mask_for(action: i32) -> u8 {
    Button::from_index(action).map_or(0, Button::key_mask)
}
