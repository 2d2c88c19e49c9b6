//! Input frame types shared by the providers, the codec and the status surface.
//!
//! Key types:
//! - [`InputFrame`]: one sampled snapshot of the device controls
//! - [`Buttons`]: independent button flags packed in a `u16`
//! - [`TouchReport`]: one finger on a touch surface

use std::fmt;

/// Button bitset. Flags are independent; any combination is valid.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Buttons(u16);

impl Buttons {
    pub const SELECT: Buttons = Buttons(1 << 0);
    pub const START: Buttons = Buttons(1 << 1);
    pub const UP: Buttons = Buttons(1 << 2);
    pub const RIGHT: Buttons = Buttons(1 << 3);
    pub const DOWN: Buttons = Buttons(1 << 4);
    pub const LEFT: Buttons = Buttons(1 << 5);
    pub const LTRIGGER: Buttons = Buttons(1 << 6);
    pub const RTRIGGER: Buttons = Buttons(1 << 7);
    pub const TRIANGLE: Buttons = Buttons(1 << 8);
    pub const CIRCLE: Buttons = Buttons(1 << 9);
    pub const CROSS: Buttons = Buttons(1 << 10);
    pub const SQUARE: Buttons = Buttons(1 << 11);
    pub const PS: Buttons = Buttons(1 << 12);

    /// All defined flags
    pub const ALL: Buttons = Buttons((1 << 13) - 1);

    const NAMES: [(Buttons, &'static str); 13] = [
        (Self::SELECT, "select"),
        (Self::START, "start"),
        (Self::UP, "up"),
        (Self::RIGHT, "right"),
        (Self::DOWN, "down"),
        (Self::LEFT, "left"),
        (Self::LTRIGGER, "l"),
        (Self::RTRIGGER, "r"),
        (Self::TRIANGLE, "triangle"),
        (Self::CIRCLE, "circle"),
        (Self::CROSS, "cross"),
        (Self::SQUARE, "square"),
        (Self::PS, "ps"),
    ];

    /// No buttons pressed
    pub const fn empty() -> Self {
        Buttons(0)
    }

    /// Raw bits
    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Build from raw bits, rejecting undefined flags
    pub const fn from_bits(bits: u16) -> Option<Self> {
        if bits & !Self::ALL.0 != 0 {
            None
        } else {
            Some(Buttons(bits))
        }
    }

    #[inline]
    pub const fn contains(self, other: Buttons) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Buttons) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Buttons) {
        self.0 &= !other.0;
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Buttons {
    type Output = Buttons;

    fn bitor(self, rhs: Buttons) -> Buttons {
        Buttons(self.0 | rhs.0)
    }
}

impl fmt::Debug for Buttons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{}", name));
            }
        }
        set.finish()
    }
}

/// One touch point on the front or back panel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchReport {
    /// Touch pressure (0 when the panel does not report force)
    pub force: u8,
    /// Finger id, stable while the finger stays down
    pub id: u8,
    pub x: i16,
    pub y: i16,
}

/// Three-axis float vector
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Motion sensor state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionState {
    /// Angular velocity
    pub gyro: Vector3,
    /// Acceleration including gravity, in g
    pub accel: Vector3,
}

/// One sampled snapshot of all device inputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputFrame {
    pub buttons: Buttons,
    pub lx: i16,
    pub ly: i16,
    pub rx: i16,
    pub ry: i16,
    pub touch_front: Vec<TouchReport>,
    pub touch_back: Vec<TouchReport>,
    pub motion: MotionState,
    /// Sample time in microseconds
    pub timestamp: u64,
}
