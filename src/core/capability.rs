//! Named capabilities and the 32-bit capability mask
//!
//! Bit positions are part of the wire format: they never move between
//! versions, and bits this build does not know about are carried through
//! untouched.

use crate::error::{CapabilityError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named boolean hardware/software feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Capability {
    /// Multi-threading support
    Threading = 0,
    /// Hardware atomic operations
    AtomicOperations = 1,
    /// Direct memory access
    DMA = 2,
    /// Virtual memory management
    VirtualMemory = 3,
    /// Memory protection/segmentation
    MemoryProtection = 4,
    /// Hardware-accelerated 3D graphics
    Hardware3D = 5,
    /// Hardware-accelerated 2D graphics
    Hardware2D = 6,
    /// Programmable vertex shaders
    VertexShaders = 7,
    /// Programmable fragment shaders
    FragmentShaders = 8,
    /// Compute shaders
    ComputeShaders = 9,
    /// Hardware audio acceleration
    HardwareAudio = 10,
    /// Multi-channel audio output
    MultiChannelAudio = 11,
    /// Hardware audio effects/DSP
    AudioEffects = 12,
    /// Multi-touch input
    MultiTouch = 13,
    /// Accelerometer/motion sensors
    Accelerometer = 14,
    /// Gamepad/controller support
    Gamepad = 15,
    /// Network connectivity
    Networking = 16,
    /// WiFi networking
    WiFi = 17,
    /// Bluetooth connectivity
    Bluetooth = 18,
    /// High-precision timer
    HighPrecisionTimer = 19,
    /// Real-time clock
    RealTimeClock = 20,
    /// Persistent file storage
    PersistentStorage = 21,
    /// Asynchronous I/O
    AsyncIO = 22,
    /// Power state management
    PowerManagement = 23,
    /// Sandbox/security restrictions (web-like hosts)
    SandboxRestrictions = 24,
}

impl Capability {
    /// Every capability known to this build, in bit order
    pub const ALL: [Capability; 25] = [
        Capability::Threading,
        Capability::AtomicOperations,
        Capability::DMA,
        Capability::VirtualMemory,
        Capability::MemoryProtection,
        Capability::Hardware3D,
        Capability::Hardware2D,
        Capability::VertexShaders,
        Capability::FragmentShaders,
        Capability::ComputeShaders,
        Capability::HardwareAudio,
        Capability::MultiChannelAudio,
        Capability::AudioEffects,
        Capability::MultiTouch,
        Capability::Accelerometer,
        Capability::Gamepad,
        Capability::Networking,
        Capability::WiFi,
        Capability::Bluetooth,
        Capability::HighPrecisionTimer,
        Capability::RealTimeClock,
        Capability::PersistentStorage,
        Capability::AsyncIO,
        Capability::PowerManagement,
        Capability::SandboxRestrictions,
    ];

    /// Bit position inside the mask
    pub fn bit_position(self) -> u8 {
        self as u8
    }

    /// Single-bit mask value
    pub fn bit(self) -> u32 {
        1u32 << self.bit_position()
    }

    /// Capability at a bit position, if known
    pub fn from_bit_position(position: u8) -> Option<Self> {
        Self::ALL.get(position as usize).copied()
    }

    /// Stable display name
    pub fn name(self) -> &'static str {
        match self {
            Capability::Threading => "Threading",
            Capability::AtomicOperations => "AtomicOperations",
            Capability::DMA => "DMA",
            Capability::VirtualMemory => "VirtualMemory",
            Capability::MemoryProtection => "MemoryProtection",
            Capability::Hardware3D => "Hardware3D",
            Capability::Hardware2D => "Hardware2D",
            Capability::VertexShaders => "VertexShaders",
            Capability::FragmentShaders => "FragmentShaders",
            Capability::ComputeShaders => "ComputeShaders",
            Capability::HardwareAudio => "HardwareAudio",
            Capability::MultiChannelAudio => "MultiChannelAudio",
            Capability::AudioEffects => "AudioEffects",
            Capability::MultiTouch => "MultiTouch",
            Capability::Accelerometer => "Accelerometer",
            Capability::Gamepad => "Gamepad",
            Capability::Networking => "Networking",
            Capability::WiFi => "WiFi",
            Capability::Bluetooth => "Bluetooth",
            Capability::HighPrecisionTimer => "HighPrecisionTimer",
            Capability::RealTimeClock => "RealTimeClock",
            Capability::PersistentStorage => "PersistentStorage",
            Capability::AsyncIO => "AsyncIO",
            Capability::PowerManagement => "PowerManagement",
            Capability::SandboxRestrictions => "SandboxRestrictions",
        }
    }

    /// Whether the capability depends on the GPU probe
    pub fn is_gpu_gated(self) -> bool {
        CapabilityMask::GPU_GATED.contains(self)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CapabilityError::UnknownCapability(wanted.to_string()))
    }
}

/// Set of capabilities packed into a `u32`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMask(u32);

impl CapabilityMask {
    /// Capabilities that only a working GPU probe can confirm
    pub const GPU_GATED: CapabilityMask = CapabilityMask(
        (1 << Capability::Hardware3D as u8)
            | (1 << Capability::Hardware2D as u8)
            | (1 << Capability::VertexShaders as u8)
            | (1 << Capability::FragmentShaders as u8)
            | (1 << Capability::ComputeShaders as u8),
    );

    /// Bits that correspond to a named capability
    pub const KNOWN: CapabilityMask = CapabilityMask((1 << 25) - 1);

    /// Empty mask
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Wrap raw bits; unknown bits are kept
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits, including unknown ones
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check membership
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & (1 << capability as u8) != 0
    }

    /// Check that every bit of `other` is set here
    pub const fn contains_all(self, other: CapabilityMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Add a capability
    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    /// Add a capability when `supported` is true
    pub fn set(&mut self, capability: Capability, supported: bool) {
        if supported {
            self.insert(capability);
        } else {
            self.remove(capability);
        }
    }

    /// Remove a capability
    pub fn remove(&mut self, capability: Capability) {
        self.0 &= !capability.bit();
    }

    /// Bitwise union
    pub const fn union(self, other: CapabilityMask) -> Self {
        Self(self.0 | other.0)
    }

    /// Bitwise intersection
    pub const fn intersection(self, other: CapabilityMask) -> Self {
        Self(self.0 & other.0)
    }

    /// Bits set here but not in `other`
    pub const fn difference(self, other: CapabilityMask) -> Self {
        Self(self.0 & !other.0)
    }

    /// No bits set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Bits this build has no name for
    pub const fn unknown_bits(self) -> u32 {
        self.0 & !Self::KNOWN.0
    }

    /// Number of known capabilities set
    pub fn count(self) -> usize {
        (self.0 & Self::KNOWN.0).count_ones() as usize
    }

    /// Iterate over known capabilities in bit order
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }

    /// Names of the known capabilities that are set
    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(Capability::name).collect()
    }

    /// Build a mask from capability names
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mask = Self::empty();
        for name in names {
            mask.insert(name.as_ref().parse()?);
        }
        Ok(mask)
    }
}

impl FromIterator<Capability> for CapabilityMask {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut mask = Self::empty();
        for capability in iter {
            mask.insert(capability);
        }
        mask
    }
}

impl std::ops::BitOr for CapabilityMask {
    type Output = CapabilityMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for CapabilityMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CapabilityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} [{}]", self.0, self.names().join(", "))
    }
}
