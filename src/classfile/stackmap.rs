//! `StackMapTable` frames (JVMS §4.7.4).
//!
//! Frames are decoded into [`crate::classfile::stackmap::StackMapFrame`] values that keep
//! their *kind* (same, chop, append, full, ...) and only replace the delta encoding of
//! offsets with an explicit position. The position type is generic: the decoder produces
//! absolute bytecode offsets (`u16`), while [`crate::method::MethodBody`] keys frames by
//! [`crate::assembly::Label`] so that they move with the code they describe.
//!
//! Since a frame kind is relative only to the locals of the previous frame, a body may
//! insert code between frames without touching their contents, as long as the inserted
//! code neither branches nor changes locals. Re-encoding picks the short or extended form
//! of each kind depending on the new offset delta.

use crate::{
    file::{
        io::{write_be, write_u16_len},
        parser::Parser,
    },
    Result,
};

/// A verification type.
///
/// `P` is the type used for the offset of the `new` instruction that created an
/// uninitialized object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType<P = u16> {
    /// Unusable slot
    Top,
    /// `int` (and narrower)
    Integer,
    /// `float`
    Float,
    /// `double` (compressed, a single entry)
    Double,
    /// `long` (compressed, a single entry)
    Long,
    /// `null`
    Null,
    /// `this` in a constructor before the super constructor call
    UninitializedThis,
    /// Instance of the `Class` at this constant pool index
    Object(u16),
    /// Result of a `new` that was not yet initialized
    Uninitialized(P),
}

impl<P> VerificationType<P> {
    /// Converts the `new`-instruction position with `map`.
    ///
    /// # Errors
    /// Propagates any error returned by `map`.
    pub fn map_position<Q, F>(&self, map: &mut F) -> Result<VerificationType<Q>>
    where
        F: FnMut(&P) -> Result<Q>,
    {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(class) => VerificationType::Object(*class),
            VerificationType::Uninitialized(position) => {
                VerificationType::Uninitialized(map(position)?)
            }
        })
    }
}

impl VerificationType<u16> {
    fn read(parser: &mut Parser<'_>) -> Result<Self> {
        let tag = parser.read_be::<u8>()?;
        Ok(match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(parser.read_be::<u16>()?),
            8 => VerificationType::Uninitialized(parser.read_be::<u16>()?),
            _ => return Err(malformed_error!("Invalid verification type tag {}", tag)),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            VerificationType::Top => out.push(0),
            VerificationType::Integer => out.push(1),
            VerificationType::Float => out.push(2),
            VerificationType::Double => out.push(3),
            VerificationType::Long => out.push(4),
            VerificationType::Null => out.push(5),
            VerificationType::UninitializedThis => out.push(6),
            VerificationType::Object(class) => {
                out.push(7);
                write_be(out, *class);
            }
            VerificationType::Uninitialized(offset) => {
                out.push(8);
                write_be(out, *offset);
            }
        }
    }
}

/// How a frame's locals and stack derive from the previous frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind<P = u16> {
    /// Same locals, empty stack
    Same,
    /// Same locals, one stack item
    SameLocals1(VerificationType<P>),
    /// The last `n` (1..=3) locals removed, empty stack
    Chop(u8),
    /// 1..=3 locals added, empty stack
    Append(Vec<VerificationType<P>>),
    /// Explicit locals and stack
    Full {
        /// All locals, compressed (one entry per `long`/`double`)
        locals: Vec<VerificationType<P>>,
        /// Stack from bottom to top
        stack: Vec<VerificationType<P>>,
    },
}

/// One stack map frame at `position`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame<P = u16> {
    /// Where the frame applies
    pub position: P,
    /// Frame contents relative to the previous frame
    pub kind: FrameKind<P>,
}

impl<P> StackMapFrame<P> {
    /// Converts every position in this frame (its own and those of uninitialized types).
    ///
    /// # Errors
    /// Propagates any error returned by `map`.
    pub fn map_positions<Q, F>(&self, map: &mut F) -> Result<StackMapFrame<Q>>
    where
        F: FnMut(&P) -> Result<Q>,
    {
        fn convert<P, Q, F>(
            types: &[VerificationType<P>],
            map: &mut F,
        ) -> Result<Vec<VerificationType<Q>>>
        where
            F: FnMut(&P) -> Result<Q>,
        {
            let mut converted = Vec::with_capacity(types.len());
            for item in types {
                converted.push(item.map_position(map)?);
            }
            Ok(converted)
        }

        let kind = match &self.kind {
            FrameKind::Same => FrameKind::Same,
            FrameKind::SameLocals1(item) => FrameKind::SameLocals1(item.map_position(map)?),
            FrameKind::Chop(count) => FrameKind::Chop(*count),
            FrameKind::Append(locals) => FrameKind::Append(convert(locals, map)?),
            FrameKind::Full { locals, stack } => FrameKind::Full {
                locals: convert(locals, map)?,
                stack: convert(stack, map)?,
            },
        };

        Ok(StackMapFrame {
            position: map(&self.position)?,
            kind,
        })
    }
}

/// Decodes a `StackMapTable` payload into frames with absolute offsets.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on reserved frame types or offsets past 64 KiB,
/// [`crate::Error::OutOfBounds`] on truncated input.
pub fn parse_stack_map(info: &[u8]) -> Result<Vec<StackMapFrame>> {
    let mut parser = Parser::new(info);
    let mut previous: Option<u32> = None;

    let frames = parser.read_table(|p| {
        let frame_type = p.read_be::<u8>()?;
        let (delta, kind) = match frame_type {
            0..=63 => (u16::from(frame_type), FrameKind::Same),
            64..=127 => (
                u16::from(frame_type - 64),
                FrameKind::SameLocals1(VerificationType::read(p)?),
            ),
            247 => {
                let delta = p.read_be::<u16>()?;
                (delta, FrameKind::SameLocals1(VerificationType::read(p)?))
            }
            248..=250 => (p.read_be::<u16>()?, FrameKind::Chop(251 - frame_type)),
            251 => (p.read_be::<u16>()?, FrameKind::Same),
            252..=254 => {
                let delta = p.read_be::<u16>()?;
                let mut locals = Vec::with_capacity(usize::from(frame_type - 251));
                for _ in 0..frame_type - 251 {
                    locals.push(VerificationType::read(p)?);
                }
                (delta, FrameKind::Append(locals))
            }
            255 => {
                let delta = p.read_be::<u16>()?;
                let locals = p.read_table(VerificationType::read)?;
                let stack = p.read_table(VerificationType::read)?;
                (delta, FrameKind::Full { locals, stack })
            }
            _ => {
                return Err(malformed_error!(
                    "Reserved stack map frame type {}",
                    frame_type
                ))
            }
        };

        let position = match previous {
            None => u32::from(delta),
            Some(previous) => previous + u32::from(delta) + 1,
        };
        let position = u16::try_from(position)
            .map_err(|_| malformed_error!("Stack map frame offset {} out of range", position))?;
        previous = Some(u32::from(position));

        Ok(StackMapFrame { position, kind })
    })?;

    if parser.has_more_data() {
        return Err(malformed_error!(
            "{} trailing bytes after StackMapTable",
            parser.remaining()
        ));
    }

    Ok(frames)
}

/// Encodes frames with absolute offsets into a `StackMapTable` payload.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if positions are not strictly increasing or a
/// frame kind carries an invalid number of locals.
pub fn stack_map_to_bytes(frames: &[StackMapFrame]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + frames.len() * 4);
    write_u16_len(&mut out, frames.len(), "stack map frames")?;

    let mut previous: Option<u16> = None;
    for frame in frames {
        let delta = match previous {
            None => frame.position,
            Some(previous) if frame.position > previous => frame.position - previous - 1,
            Some(previous) => {
                return Err(malformed_error!(
                    "Stack map frame at {} does not follow frame at {}",
                    frame.position,
                    previous
                ))
            }
        };
        previous = Some(frame.position);

        match &frame.kind {
            FrameKind::Same if delta < 64 => out.push(delta as u8),
            FrameKind::Same => {
                out.push(251);
                write_be(&mut out, delta);
            }
            FrameKind::SameLocals1(item) => {
                if delta < 64 {
                    out.push(64 + delta as u8);
                } else {
                    out.push(247);
                    write_be(&mut out, delta);
                }
                item.write(&mut out);
            }
            FrameKind::Chop(count @ 1..=3) => {
                out.push(251 - count);
                write_be(&mut out, delta);
            }
            FrameKind::Append(locals) if (1..=3).contains(&locals.len()) => {
                out.push(251 + locals.len() as u8);
                write_be(&mut out, delta);
                for local in locals {
                    local.write(&mut out);
                }
            }
            FrameKind::Full { locals, stack } => {
                out.push(255);
                write_be(&mut out, delta);
                write_u16_len(&mut out, locals.len(), "frame locals")?;
                for local in locals {
                    local.write(&mut out);
                }
                write_u16_len(&mut out, stack.len(), "frame stack items")?;
                for item in stack {
                    item.write(&mut out);
                }
            }
            FrameKind::Chop(_) | FrameKind::Append(_) => {
                return Err(malformed_error!(
                    "Invalid frame kind at {}: {:?}",
                    frame.position,
                    frame.kind
                ))
            }
        }
    }

    Ok(out)
}
