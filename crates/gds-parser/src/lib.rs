//! Binary GDSII stream parser: turns a record stream into a [`Document`]
//! through a cooperatively-suspending [`Parser`], with a strict fast path
//! that falls back to a permissive decoder when it meets the deprecated
//! `BGNEXTN`/`ENDEXTN` records.

mod float;
mod reader;
mod tags;

use gds_document::{CellDraft, Document, DocumentBuilder, Instance, Polygon};
use gds_protocol::{ParseError, ParseStage, ParseStatistics};
use geometry::{Point, Units};
use reader::RecordReader;

/// The outcome of one [`Parser::step`] call.
#[derive(Debug)]
pub enum ParseStep {
    Continue { fraction: f32 },
    Done(Document),
    Cancelled,
}

/// Records per call before a [`Parser::step`] yields. Keeps each step's
/// work bounded regardless of document size, per the cooperative
/// scheduling contract.
const RECORDS_PER_STEP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Boundary,
    Sref,
    Path,
    Box,
    Aref,
    Text,
    Unrecognised,
}

#[derive(Debug, Default)]
struct ElementAccum {
    kind: Option<ElementKind>,
    layer: Option<i32>,
    datatype: Option<i32>,
    xy: Vec<Point>,
    sname: Option<String>,
    mirror: bool,
    magnification: Option<f64>,
    rotation_degrees: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitHeader,
    AwaitBgnlib,
    LibraryMeta,
    AwaitStrname,
    InStructure,
    InElement,
    Done,
}

/// A cooperatively-suspending parse in progress. Call [`Parser::step`]
/// repeatedly; it processes a bounded chunk of records per call and
/// reports fractional progress until the stream is exhausted.
pub struct Parser<'a> {
    bytes: &'a [u8],
    reader: RecordReader<'a>,
    permissive: bool,
    stage: Stage,
    builder: DocumentBuilder,
    units: Units,
    statistics: ParseStatistics,
    current_cell_name: Option<String>,
    current_cell_draft: CellDraft,
    current_element: ElementAccum,
    cancelled: bool,
}

impl<'a> Parser<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            reader: RecordReader::new(bytes),
            permissive: false,
            stage: Stage::AwaitHeader,
            builder: DocumentBuilder::new(),
            units: Units { db_per_user: 1e-9, user_per_meter: 1e-6 },
            statistics: ParseStatistics::default(),
            current_cell_name: None,
            current_cell_draft: CellDraft::default(),
            current_element: ElementAccum::default(),
            cancelled: false,
        }
    }

    /// Aborts the in-flight parse at the next step. Per the cooperative
    /// scheduling model, partially-built state is simply dropped; no
    /// partial `Document` is ever returned.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Processes up to [`RECORDS_PER_STEP`] records and returns either
    /// `Continue` (call again), `Done` with the finished `Document`, or
    /// `Cancelled` if [`Parser::cancel`] was called since the last step —
    /// in which case all partially-built state is simply dropped, not
    /// surfaced as a `ParseError`.
    pub fn step(&mut self) -> Result<ParseStep, ParseError> {
        if self.cancelled {
            return Ok(ParseStep::Cancelled);
        }

        for _ in 0..RECORDS_PER_STEP {
            if self.cancelled {
                return Ok(ParseStep::Cancelled);
            }
            if self.stage == Stage::Done {
                break;
            }
            match self.advance_one_record() {
                Ok(()) => {}
                Err(error) => {
                    if self.try_fallback_on(&error) {
                        continue;
                    }
                    return Err(error);
                }
            }
        }

        if self.stage == Stage::Done {
            let document = std::mem::replace(&mut self.builder, DocumentBuilder::new())
                .build(self.units, self.statistics)?;
            return Ok(ParseStep::Done(document));
        }

        let total = self.reader.total_len().max(1);
        let fraction = (self.reader.offset() as f32 / total as f32).min(0.999);
        Ok(ParseStep::Continue { fraction })
    }

    /// If `error` is an unknown-tag failure on a deprecated record, resets
    /// to a full rescan in permissive mode and reports success (`true`).
    /// Otherwise leaves state untouched and reports `false`.
    fn try_fallback_on(&mut self, error: &ParseError) -> bool {
        if self.permissive {
            return false;
        }
        let is_deprecated_tag = matches!(
            error,
            ParseError::UnknownTag { tag, .. } if *tag == tags::BGNEXTN || *tag == tags::ENDEXTN
        );
        if !is_deprecated_tag {
            return false;
        }

        log::debug!("gds-parser: falling back to permissive decoder after deprecated-record tag");
        self.reader = RecordReader::new(self.bytes);
        self.permissive = true;
        self.stage = Stage::AwaitHeader;
        self.builder = DocumentBuilder::new();
        self.units = Units { db_per_user: 1e-9, user_per_meter: 1e-6 };
        self.statistics = ParseStatistics { used_fallback_decoder: true, ..ParseStatistics::default() };
        self.current_cell_name = None;
        self.current_cell_draft = CellDraft::default();
        self.current_element = ElementAccum::default();
        true
    }

    fn advance_one_record(&mut self) -> Result<(), ParseError> {
        let parse_stage = match self.stage {
            Stage::AwaitHeader => ParseStage::Header,
            Stage::AwaitBgnlib | Stage::LibraryMeta => ParseStage::Library,
            Stage::AwaitStrname | Stage::InStructure => ParseStage::Structure,
            Stage::InElement => ParseStage::Element,
            Stage::Done => ParseStage::EndLib,
        };

        let Some((tag, payload)) = self.reader.next(parse_stage)? else {
            // End of stream with no ENDLIB yet. Between structures (no
            // BGNSTR currently open) this is an implicit finish, matching
            // "ignore trailing bytes". Inside a structure (a BGNSTR with
            // no matching ENDSTR) it is unterminated.
            return match self.stage {
                Stage::AwaitStrname | Stage::InStructure | Stage::InElement => {
                    Err(ParseError::UnterminatedStructure {
                        offset: self.reader.offset(),
                        name: self.current_cell_name.clone().unwrap_or_default(),
                    })
                }
                _ => {
                    self.stage = Stage::Done;
                    Ok(())
                }
            };
        };

        match self.stage {
            Stage::AwaitHeader => {
                if tag == tags::HEADER {
                    self.stage = Stage::AwaitBgnlib;
                } else {
                    self.unknown_tag(ParseStage::Header, tag)?;
                }
            }
            Stage::AwaitBgnlib => {
                if tag == tags::BGNLIB {
                    self.stage = Stage::LibraryMeta;
                } else {
                    self.unknown_tag(ParseStage::Library, tag)?;
                }
            }
            Stage::LibraryMeta => match tag {
                t if t == tags::LIBNAME => {}
                t if t == tags::UNITS => self.read_units(payload)?,
                t if t == tags::BGNSTR => self.stage = Stage::AwaitStrname,
                t if t == tags::ENDLIB => self.stage = Stage::Done,
                other => self.unknown_tag(ParseStage::Library, other)?,
            },
            Stage::AwaitStrname => {
                if tag == tags::STRNAME {
                    self.current_cell_name = Some(read_ascii(payload));
                    self.current_cell_draft = CellDraft::default();
                    self.stage = Stage::InStructure;
                } else {
                    self.unknown_tag(ParseStage::Structure, tag)?;
                }
            }
            Stage::InStructure => match tag {
                t if t == tags::BOUNDARY => self.begin_element(ElementKind::Boundary),
                t if t == tags::SREF => self.begin_element(ElementKind::Sref),
                t if t == tags::PATH => self.begin_element(ElementKind::Path),
                t if t == tags::BOX => self.begin_element(ElementKind::Box),
                t if t == tags::AREF => self.begin_element(ElementKind::Aref),
                t if t == tags::TEXT => self.begin_element(ElementKind::Text),
                t if t == tags::ENDSTR => self.finish_structure(),
                other => {
                    if self.permissive {
                        self.begin_element(ElementKind::Unrecognised);
                        self.statistics.unknown_tags_skipped += 1;
                    } else {
                        self.unknown_tag(ParseStage::Structure, other)?;
                    }
                }
            },
            Stage::InElement => self.read_element_field(tag, payload)?,
            Stage::Done => {}
        }
        Ok(())
    }

    fn unknown_tag(&mut self, stage: ParseStage, tag: u16) -> Result<(), ParseError> {
        if self.permissive {
            self.statistics.unknown_tags_skipped += 1;
            Ok(())
        } else {
            Err(ParseError::UnknownTag { stage, offset: self.reader.offset(), tag })
        }
    }

    fn begin_element(&mut self, kind: ElementKind) {
        self.current_element = ElementAccum { kind: Some(kind), ..ElementAccum::default() };
        self.stage = Stage::InElement;
    }

    fn read_element_field(&mut self, tag: u16, payload: &[u8]) -> Result<(), ParseError> {
        match tag {
            t if t == tags::LAYER => self.current_element.layer = Some(read_i16(payload) as i32),
            t if t == tags::DATATYPE => self.current_element.datatype = Some(read_i16(payload) as i32),
            t if t == tags::XY => self.current_element.xy = read_xy(payload),
            t if t == tags::SNAME => self.current_element.sname = Some(read_ascii(payload)),
            t if t == tags::STRANS => {
                let bits = read_u16(payload);
                self.current_element.mirror = bits & tags::STRANS_MIRROR_BIT != 0;
            }
            t if t == tags::MAG => self.current_element.magnification = Some(read_f64(payload)),
            t if t == tags::ANGLE => self.current_element.rotation_degrees = Some(read_f64(payload)),
            t if t == tags::WIDTH || t == tags::PATHTYPE || t == tags::COLROW || t == tags::STRING => {}
            t if t == tags::ENDEL => self.finish_element(),
            // BGNEXTN/ENDEXTN are deprecated and only understood by the
            // permissive decoder; the fast path treats them like any other
            // unknown tag so the fallback trigger in `try_fallback_on`
            // fires on them.
            other => {
                if self.permissive {
                    self.statistics.unknown_tags_skipped += 1;
                } else {
                    return Err(ParseError::UnknownTag {
                        stage: ParseStage::Element,
                        offset: self.reader.offset(),
                        tag: other,
                    });
                }
            }
        }
        Ok(())
    }

    fn finish_element(&mut self) {
        let element = std::mem::take(&mut self.current_element);
        match element.kind {
            Some(ElementKind::Boundary) => {
                let layer = element.layer.unwrap_or(0);
                let datatype = element.datatype.unwrap_or(0);
                match Polygon::try_new(layer, datatype, element.xy) {
                    Some(polygon) => {
                        self.current_cell_draft.polygons.push(polygon);
                        self.statistics.polygons_emitted += 1;
                    }
                    None => self.statistics.polygons_degenerate_dropped += 1,
                }
            }
            Some(ElementKind::Sref) => {
                let (x, y) = element.xy.first().map(|p| (p.x, p.y)).unwrap_or((0.0, 0.0));
                self.current_cell_draft.instances.push(Instance {
                    cell_ref: element.sname.unwrap_or_default(),
                    x,
                    y,
                    rotation_degrees: element.rotation_degrees.unwrap_or(0.0),
                    mirror: element.mirror,
                    magnification: element.magnification.unwrap_or(1.0),
                });
            }
            Some(ElementKind::Path) => self.statistics.paths_skipped += 1,
            Some(ElementKind::Box) => self.statistics.boxes_skipped += 1,
            Some(ElementKind::Aref) => self.statistics.arefs_skipped += 1,
            Some(ElementKind::Text) => self.statistics.texts_skipped += 1,
            Some(ElementKind::Unrecognised) | None => {}
        }
        self.stage = Stage::InStructure;
    }

    fn finish_structure(&mut self) {
        if let Some(name) = self.current_cell_name.take() {
            let draft = std::mem::take(&mut self.current_cell_draft);
            self.builder.add_cell(name, draft);
        }
        self.stage = Stage::LibraryMeta;
    }

    fn read_units(&mut self, payload: &[u8]) -> Result<(), ParseError> {
        if payload.len() < 16 {
            return Err(ParseError::Truncated {
                offset: self.reader.offset(),
                expected: 16,
                available: payload.len(),
            });
        }
        let db_per_user = read_f64(&payload[0..8]);
        let user_per_meter = read_f64(&payload[8..16]);
        self.units = Units { db_per_user, user_per_meter };
        Ok(())
    }
}

fn read_u16(payload: &[u8]) -> u16 {
    u16::from_be_bytes([payload[0], payload[1]])
}

fn read_i16(payload: &[u8]) -> i16 {
    i16::from_be_bytes([payload[0], payload[1]])
}

fn read_i32(payload: &[u8]) -> i32 {
    i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
}

fn read_f64(payload: &[u8]) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&payload[0..8]);
    float::decode(bytes)
}

/// Reads `XY` as a flat sequence of (x, y) `i32` pairs. This is the only
/// form the binary record layout produces; the "nested vs. flat" framing
/// in the format description applies to intermediate JSON-like
/// representations, not the record bytes this reader consumes.
fn read_xy(payload: &[u8]) -> Vec<Point> {
    payload
        .chunks_exact(8)
        .map(|chunk| Point::new(read_i32(&chunk[0..4]) as f64, read_i32(&chunk[4..8]) as f64))
        .collect()
}

fn read_ascii(payload: &[u8]) -> String {
    let trimmed = payload
        .iter()
        .rposition(|&byte| byte != 0 && byte != b' ')
        .map(|last| &payload[..=last])
        .unwrap_or(&[]);
    String::from_utf8_lossy(trimmed).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_completion(bytes: &[u8]) -> Result<Document, ParseError> {
        let mut parser = Parser::new(bytes);
        loop {
            match parser.step()? {
                ParseStep::Done(document) => return Ok(document),
                ParseStep::Continue { .. } => continue,
                ParseStep::Cancelled => panic!("parser unexpectedly cancelled"),
            }
        }
    }

    struct RecordBuilder {
        bytes: Vec<u8>,
    }

    impl RecordBuilder {
        fn new() -> Self {
            Self { bytes: Vec::new() }
        }

        fn record(mut self, tag: u16, payload: &[u8]) -> Self {
            let length = (4 + payload.len()) as u16;
            self.bytes.extend_from_slice(&length.to_be_bytes());
            self.bytes.extend_from_slice(&tag.to_be_bytes());
            self.bytes.extend_from_slice(payload);
            self
        }

        fn ascii(self, tag: u16, text: &str) -> Self {
            let mut payload = text.as_bytes().to_vec();
            if payload.len() % 2 != 0 {
                payload.push(0);
            }
            self.record(tag, &payload)
        }

        fn xy(self, points: &[(i32, i32)]) -> Self {
            let mut payload = Vec::with_capacity(points.len() * 8);
            for (x, y) in points {
                payload.extend_from_slice(&x.to_be_bytes());
                payload.extend_from_slice(&y.to_be_bytes());
            }
            self.record(tags::XY, &payload)
        }

        fn finish(self) -> Vec<u8> {
            self.bytes
        }
    }

    fn library_header() -> RecordBuilder {
        RecordBuilder::new()
            .record(tags::HEADER, &600i16.to_be_bytes())
            .record(tags::BGNLIB, &[0u8; 24])
            .ascii(tags::LIBNAME, "LIB")
            .record(tags::UNITS, &{
                let mut payload = float::encode(1e-9).to_vec();
                payload.extend_from_slice(&float::encode(1e-6));
                payload
            })
    }

    #[test]
    fn two_squares_one_layer_produce_one_polygon_rich_cell() {
        let bytes = library_header()
            .record(tags::BGNSTR, &[0u8; 24])
            .ascii(tags::STRNAME, "TOP")
            .record(tags::BOUNDARY, &[])
            .record(tags::LAYER, &1i16.to_be_bytes())
            .record(tags::DATATYPE, &0i16.to_be_bytes())
            .xy(&[(0, 0), (10, 0), (10, 10), (0, 10)])
            .record(tags::ENDEL, &[])
            .record(tags::BOUNDARY, &[])
            .record(tags::LAYER, &1i16.to_be_bytes())
            .record(tags::DATATYPE, &0i16.to_be_bytes())
            .xy(&[(20, 0), (30, 0), (30, 10), (20, 10)])
            .record(tags::ENDEL, &[])
            .record(tags::ENDSTR, &[])
            .record(tags::ENDLIB, &[])
            .finish();

        let document = run_to_completion(&bytes).unwrap();
        let top = document.top_cells().next().unwrap();
        assert_eq!(top.polygons.len(), 2);
        assert_eq!(document.statistics().polygons_emitted, 2);
    }

    #[test]
    fn deprecated_path_extension_records_trigger_permissive_fallback() {
        let bytes = library_header()
            .record(tags::BGNSTR, &[0u8; 24])
            .ascii(tags::STRNAME, "TOP")
            .record(tags::BOUNDARY, &[])
            .record(tags::LAYER, &1i16.to_be_bytes())
            .record(tags::DATATYPE, &0i16.to_be_bytes())
            .xy(&[(0, 0), (1, 0), (1, 1), (0, 1)])
            .record(tags::ENDEL, &[])
            .record(tags::PATH, &[])
            .record(tags::LAYER, &2i16.to_be_bytes())
            .record(tags::BGNEXTN, &0i32.to_be_bytes())
            .record(tags::ENDEXTN, &0i32.to_be_bytes())
            .xy(&[(0, 0), (5, 5)])
            .record(tags::ENDEL, &[])
            .record(tags::ENDSTR, &[])
            .record(tags::ENDLIB, &[])
            .finish();

        let document = run_to_completion(&bytes).unwrap();
        assert!(document.statistics().used_fallback_decoder);
        assert!(document.statistics().paths_skipped >= 1);
    }

    #[test]
    fn context_cell_instances_do_not_keep_chip_out_of_top_cells() {
        let mut builder = library_header().record(tags::BGNSTR, &[0u8; 24]).ascii(tags::STRNAME, "$$$CONTEXT_INFO$$$");
        builder = builder
            .record(tags::BOUNDARY, &[])
            .record(tags::LAYER, &0i16.to_be_bytes())
            .record(tags::DATATYPE, &0i16.to_be_bytes())
            .xy(&[(0, 0), (1, 0), (1, 1), (0, 1)])
            .record(tags::ENDEL, &[]);
        for _ in 0..3 {
            builder = builder
                .record(tags::SREF, &[])
                .ascii(tags::SNAME, "chip")
                .xy(&[(0, 0)])
                .record(tags::ENDEL, &[]);
        }
        let bytes = builder
            .record(tags::ENDSTR, &[])
            .record(tags::BGNSTR, &[0u8; 24])
            .ascii(tags::STRNAME, "chip")
            .record(tags::ENDSTR, &[])
            .record(tags::ENDLIB, &[])
            .finish();

        let document = run_to_completion(&bytes).unwrap();
        let top_names: Vec<_> = document.top_cells().map(|cell| cell.name.clone()).collect();
        assert_eq!(top_names, vec!["chip".to_string()]);
    }

    #[test]
    fn mirror_and_rotate_instance_fields_survive_parsing() {
        let bytes = library_header()
            .record(tags::BGNSTR, &[0u8; 24])
            .ascii(tags::STRNAME, "TOP")
            .record(tags::SREF, &[])
            .ascii(tags::SNAME, "CHILD")
            .record(tags::STRANS, &tags::STRANS_MIRROR_BIT.to_be_bytes())
            .record(tags::ANGLE, &float::encode(180.0))
            .xy(&[(0, 0)])
            .record(tags::ENDEL, &[])
            .record(tags::ENDSTR, &[])
            .record(tags::BGNSTR, &[0u8; 24])
            .ascii(tags::STRNAME, "CHILD")
            .record(tags::ENDSTR, &[])
            .record(tags::ENDLIB, &[])
            .finish();

        let document = run_to_completion(&bytes).unwrap();
        let top = document.cell("TOP").unwrap();
        let instance = &top.instances[0];
        assert!(instance.mirror);
        assert!((instance.rotation_degrees - 180.0).abs() < 1e-9);
    }

    #[test]
    fn stream_ending_inside_an_open_structure_is_unterminated() {
        let bytes = library_header()
            .record(tags::BGNSTR, &[0u8; 24])
            .ascii(tags::STRNAME, "TOP")
            .record(tags::BOUNDARY, &[])
            .record(tags::LAYER, &1i16.to_be_bytes())
            .record(tags::DATATYPE, &0i16.to_be_bytes())
            .xy(&[(0, 0), (1, 0), (1, 1), (0, 1)])
            .record(tags::ENDEL, &[])
            // No ENDSTR, no ENDLIB: the stream simply stops here.
            .finish();

        match run_to_completion(&bytes) {
            Err(ParseError::UnterminatedStructure { name, .. }) => assert_eq!(name, "TOP"),
            other => panic!("expected UnterminatedStructure, got {other:?}"),
        }
    }

    #[test]
    fn trailing_padding_after_endlib_is_ignored() {
        let mut bytes = library_header().record(tags::ENDLIB, &[]).finish();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert!(run_to_completion(&bytes).is_ok());
    }
}
