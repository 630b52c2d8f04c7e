use winnow::{
    binary::{be_u16, be_u32, be_u64, u8},
    combinator::{repeat, trace},
    error::{StrContext, StrContextValue},
    token::{rest, take},
    Bytes, LocatingSlice, ModalResult, Parser,
};

use crate::{atom::FourCC, error::Error};

pub type Stream<'i> = LocatingSlice<&'i Bytes>;

pub fn stream(b: &[u8]) -> Stream<'_> {
    LocatingSlice::new(Bytes::new(b))
}

/// Runs `parser` over the whole of `input`, mapping failures to [`Error`].
pub fn parse_fully<'i, O, P>(atom_type: FourCC, input: &'i [u8], mut parser: P) -> Result<O, Error>
where
    P: Parser<Stream<'i>, O, winnow::error::ErrMode<winnow::error::ContextError>>,
{
    parser
        .parse(stream(input))
        .map_err(|err| Error::from_winnow(atom_type, err))
}

pub fn fourcc(input: &mut Stream<'_>) -> ModalResult<FourCC> {
    trace(
        "fourcc",
        (byte_array)
            .map(FourCC)
            .context(StrContext::Label("fourcc")),
    )
    .parse_next(input)
}

pub fn version(input: &mut Stream<'_>) -> ModalResult<u8> {
    trace("version", u8)
        .context(StrContext::Label("version"))
        .parse_next(input)
}

pub fn version_0_or_1(input: &mut Stream<'_>) -> ModalResult<u8> {
    trace(
        "version_0_or_1",
        version
            .verify(|version| *version <= 1)
            .context(StrContext::Expected(StrContextValue::Description(
                "expected version 0 or 1",
            ))),
    )
    .parse_next(input)
}

pub fn flags3(input: &mut Stream<'_>) -> ModalResult<[u8; 3]> {
    trace("flags", byte_array)
        .context(StrContext::Label("flags"))
        .parse_next(input)
}

pub fn be_u32_as_u64(input: &mut Stream<'_>) -> ModalResult<u64> {
    trace(
        "be_u32_as_u64",
        be_u32
            .map(|s| s as u64)
            .context(StrContext::Expected(StrContextValue::Description("be u32"))),
    )
    .parse_next(input)
}

/// Parses a field that is 32 bits wide for version 0 boxes and 64 bits wide for version 1 boxes.
pub fn be_u32_or_u64<'i>(version: u8) -> impl Parser<Stream<'i>, u64, winnow::error::ErrMode<winnow::error::ContextError>> {
    trace("be_u32_or_u64", move |input: &mut Stream<'i>| {
        if version == 1 {
            be_u64.parse_next(input)
        } else {
            be_u32_as_u64.parse_next(input)
        }
    })
}

/// Parses a be u32 entry count followed by exactly that many entries.
pub fn counted<'i, O, P>(
    mut entry: P,
) -> impl Parser<Stream<'i>, Vec<O>, winnow::error::ErrMode<winnow::error::ContextError>>
where
    P: Parser<Stream<'i>, O, winnow::error::ErrMode<winnow::error::ContextError>>,
{
    trace("counted", move |input: &mut Stream<'i>| {
        let count = be_u32
            .context(StrContext::Label("entry_count"))
            .parse_next(input)?;
        repeat(count as usize, entry.by_ref()).parse_next(input)
    })
}

pub fn byte_array<const N: usize>(input: &mut Stream<'_>) -> ModalResult<[u8; N]> {
    trace(
        "byte_array",
        take(N).map(|data: &[u8]| {
            let mut out = [0u8; N];
            out.copy_from_slice(data);
            out
        }),
    )
    .parse_next(input)
}

pub fn rest_vec<'i>(input: &mut Stream<'i>) -> ModalResult<Vec<u8>> {
    trace("rest_vec", move |input: &mut Stream<'i>| {
        let data = rest.parse_next(input)?;
        Ok(data.to_vec())
    })
    .parse_next(input)
}

pub const FIXED_POINT_16X16_SCALE: f32 = 65536.0;

pub fn fixed_point_16x16(input: &mut Stream<'_>) -> ModalResult<f32> {
    trace(
        "fixed_point_16_x_16",
        be_u32.map(|v| (v as f32) / FIXED_POINT_16X16_SCALE),
    )
    .parse_next(input)
}

pub const FIXED_POINT_8X8_SCALE: f32 = 256.0;

pub fn fixed_point_8x8(input: &mut Stream<'_>) -> ModalResult<f32> {
    trace(
        "fixed_point_8x8",
        be_u16.map(|v| (v as f32) / FIXED_POINT_8X8_SCALE),
    )
    .parse_next(input)
}
