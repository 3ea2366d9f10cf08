//! Contact records and the touch frame decoder.
//!
//! The multitouch framework hands each frame over as a transient array of
//! fixed-layout records. [`decode_raw`] validates that array and copies every
//! record into an owned [`Contact`], so nothing borrowed from the buffer
//! outlives the callback invocation.

use crate::error::DecodeError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle state of one finger contact, in the order the framework walks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(i32)]
pub enum TouchState {
    /// No finger in this slot.
    NotTracking = 0,
    /// A finger has started to come into range.
    StartInRange = 1,
    /// A finger is hovering over the surface.
    HoverInRange = 2,
    /// A finger is making contact.
    MakeTouch = 3,
    /// A finger is resting or moving on the surface.
    Touching = 4,
    /// A finger is lifting off.
    BreakTouch = 5,
    /// A lifted finger is still within range.
    LingerInRange = 6,
    /// The finger has left the sensing range.
    OutOfRange = 7,
}

impl TouchState {
    /// All states in lifecycle order.
    pub const ALL: [TouchState; 8] = [
        TouchState::NotTracking,
        TouchState::StartInRange,
        TouchState::HoverInRange,
        TouchState::MakeTouch,
        TouchState::Touching,
        TouchState::BreakTouch,
        TouchState::LingerInRange,
        TouchState::OutOfRange,
    ];

    /// Raw value as reported by the framework.
    pub fn raw(self) -> i32 {
        self as i32
    }

    /// States in which geometry changes are reported as updates.
    pub fn reports_updates(self) -> bool {
        matches!(
            self,
            TouchState::MakeTouch
                | TouchState::Touching
                | TouchState::BreakTouch
                | TouchState::LingerInRange
        )
    }

    /// States that close a finger's lifecycle.
    pub fn ends_lifecycle(self) -> bool {
        matches!(self, TouchState::OutOfRange | TouchState::NotTracking)
    }

    /// States through which a lifecycle normally begins.
    pub fn is_entry(self) -> bool {
        matches!(
            self,
            TouchState::StartInRange | TouchState::HoverInRange | TouchState::MakeTouch
        )
    }

    /// Transition table for one finger between consecutive frames.
    ///
    /// Frames may skip states, so any forward move is accepted. The only
    /// backward moves accepted are a re-touch after lift-off and the jump to
    /// the terminal states.
    pub fn can_transition_to(self, next: TouchState) -> bool {
        if next == self || next.ends_lifecycle() {
            return true;
        }
        match (self, next) {
            (
                TouchState::BreakTouch | TouchState::LingerInRange,
                TouchState::MakeTouch | TouchState::Touching,
            ) => true,
            _ => next > self,
        }
    }
}

impl TryFrom<i32> for TouchState {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|index| TouchState::ALL.get(index).copied())
            .ok_or(value)
    }
}

/// A 2D point as laid out by the framework.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Position and velocity pair.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vector {
    pub position: Point,
    pub velocity: Point,
}

/// One finger record exactly as the framework lays it out in memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawFinger {
    pub frame: i32,
    pub timestamp: f64,
    pub path_index: i32,
    pub state: i32,
    pub finger_id: i32,
    pub hand_id: i32,
    pub normalized: Vector,
    pub z_total: f32,
    pub z_pressure: f32,
    pub angle: f32,
    pub major_axis: f32,
    pub minor_axis: f32,
    pub absolute: Vector,
    pub reserved: [i32; 2],
    pub z_density: f32,
}

/// One finger's decoded state in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Contact {
    /// Frame number, monotonic per device.
    pub frame: i32,
    /// Device clock, in seconds.
    pub timestamp: f64,
    /// Slot assigned for this finger's lifetime.
    pub path_index: i32,
    pub state: TouchState,
    /// Stable for one touch lifecycle; reused after release.
    pub finger_id: i32,
    pub hand_id: i32,
    /// Unit square, origin bottom-left.
    pub normalized: Vector,
    /// Millimeters, origin bottom-left.
    pub absolute: Vector,
    /// Contact quality, a multiple of 1/8 in `0..=1`.
    pub quality: f32,
    /// Zero on surfaces without force sensing.
    pub pressure: f32,
    pub angle: f32,
    pub major_axis: f32,
    pub minor_axis: f32,
    pub density: f32,
    /// Carried through untouched; always zero on current hardware.
    pub reserved: [i32; 2],
}

impl Contact {
    /// Copy a raw record, validating its state value.
    pub fn from_raw(raw: &RawFinger) -> Result<Self, i32> {
        Ok(Self {
            frame: raw.frame,
            timestamp: raw.timestamp,
            path_index: raw.path_index,
            state: TouchState::try_from(raw.state)?,
            finger_id: raw.finger_id,
            hand_id: raw.hand_id,
            normalized: raw.normalized,
            absolute: raw.absolute,
            quality: raw.z_total,
            pressure: raw.z_pressure,
            angle: raw.angle,
            major_axis: raw.major_axis,
            minor_axis: raw.minor_axis,
            density: raw.z_density,
            reserved: raw.reserved,
        })
    }

    /// Bit-for-bit comparison of every geometric field.
    ///
    /// Frame number, timestamp and state are not geometry and are ignored.
    pub fn same_geometry(&self, other: &Contact) -> bool {
        fn bits(c: &Contact) -> [u32; 16] {
            [
                c.normalized.position.x.to_bits(),
                c.normalized.position.y.to_bits(),
                c.normalized.velocity.x.to_bits(),
                c.normalized.velocity.y.to_bits(),
                c.absolute.position.x.to_bits(),
                c.absolute.position.y.to_bits(),
                c.absolute.velocity.x.to_bits(),
                c.absolute.velocity.y.to_bits(),
                c.quality.to_bits(),
                c.pressure.to_bits(),
                c.angle.to_bits(),
                c.major_axis.to_bits(),
                c.minor_axis.to_bits(),
                c.density.to_bits(),
                c.path_index as u32,
                c.hand_id as u32,
            ]
        }
        bits(self) == bits(other)
    }
}

/// All contacts reported for one device in one callback.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Frame {
    pub number: i32,
    pub timestamp: f64,
    pub contacts: Vec<Contact>,
}

impl Frame {
    /// A frame with no contacts.
    pub fn empty(number: i32, timestamp: f64) -> Self {
        Self {
            number,
            timestamp,
            contacts: Vec::new(),
        }
    }

    /// Number of contacts in the `Touching` state.
    pub fn touching_count(&self) -> usize {
        self.contacts
            .iter()
            .filter(|c| c.state == TouchState::Touching)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

/// Decode a borrowed slice of raw records into an owned frame.
pub fn decode_frame(
    records: &[RawFinger],
    number: i32,
    timestamp: f64,
) -> Result<Frame, DecodeError> {
    let contacts = records
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            Contact::from_raw(raw).map_err(|value| DecodeError::UnknownState { index, value })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Frame {
        number,
        timestamp,
        contacts,
    })
}

/// Decode the record buffer handed to a contact frame callback.
///
/// A zero count yields an empty frame regardless of the pointer.
///
/// # Safety
///
/// When `count` is positive and `data` is non-null, `data` must point to
/// `count` initialized records that stay valid for the duration of this call.
pub unsafe fn decode_raw(
    data: *const RawFinger,
    count: i32,
    number: i32,
    timestamp: f64,
) -> Result<Frame, DecodeError> {
    if count < 0 {
        return Err(DecodeError::NegativeCount(count));
    }
    if count == 0 {
        return Ok(Frame::empty(number, timestamp));
    }
    if data.is_null() {
        return Err(DecodeError::NullBuffer(count));
    }

    let records = unsafe { std::slice::from_raw_parts(data, count as usize) };
    decode_frame(records, number, timestamp)
}
