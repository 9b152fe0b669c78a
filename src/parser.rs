use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::MalformedDocumentError;
use crate::geo_math::nearest_neighbor_order;
use crate::geo_types::*;
use crate::options::ParseOptions;

type Result<T> = std::result::Result<T, MalformedDocumentError>;

/// Parse a KML-style route document with default options.
pub fn parse_document(xml: &str) -> Result<ParsedTrack> {
    parse_document_with(xml, &ParseOptions::default())
}

/// Parse a KML-style route document into a single ordered track.
///
/// Only text that is not well-formed XML is an error. Missing paths,
/// unparseable or out-of-range coordinates and unknown elements degrade to
/// a smaller (possibly empty) track.
pub fn parse_document_with(xml: &str, opts: &ParseOptions) -> Result<ParsedTrack> {
    let mut reader = Reader::from_str(xml);
    let mut doc = RawDocument::default();

    let mut depth: usize = 0;
    let mut seen_root = false;
    let mut root_closed = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if root_closed {
                    return Err(MalformedDocumentError::ContentAfterRoot);
                }
                seen_root = true;
                let consumed = match e.local_name().as_ref() {
                    b"Placemark" => {
                        parse_placemark(&mut reader, &mut doc, opts)?;
                        true
                    }
                    b"LineString" => {
                        let path = parse_line_string(&mut reader, &mut doc, opts)?;
                        doc.path.extend(path);
                        true
                    }
                    b"Track" => {
                        let path = parse_gx_track(&mut reader, &mut doc, opts)?;
                        doc.path.extend(path);
                        true
                    }
                    b"Point" => {
                        if let Some(c) = parse_point(&mut reader, &mut doc, opts)? {
                            doc.annotations.push(Placemark::new(c));
                        }
                        true
                    }
                    b"name" if doc.name.is_none() => {
                        let name = read_text_owned(&mut reader, &e)?;
                        doc.name = non_empty(name);
                        true
                    }
                    _ => false,
                };
                if !consumed {
                    depth += 1;
                } else if depth == 0 {
                    root_closed = true;
                }
            }
            Event::Empty(_) => {
                if root_closed {
                    return Err(MalformedDocumentError::ContentAfterRoot);
                }
                seen_root = true;
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::Text(e) if depth == 0 => {
                if !e.as_ref().iter().all(u8::is_ascii_whitespace) {
                    return Err(stray_content(seen_root));
                }
            }
            Event::CData(_) | Event::GeneralRef(_) if depth == 0 => {
                return Err(stray_content(seen_root));
            }
            Event::Eof => {
                if depth > 0 {
                    return Err(MalformedDocumentError::UnexpectedEof);
                }
                if !seen_root {
                    return Err(MalformedDocumentError::NoRootElement);
                }
                break;
            }
            _ => {}
        }
    }

    Ok(doc.into_track(opts))
}

fn stray_content(seen_root: bool) -> MalformedDocumentError {
    if seen_root {
        MalformedDocumentError::ContentAfterRoot
    } else {
        MalformedDocumentError::NoRootElement
    }
}

/// Everything collected in one pass, before reconstruction.
#[derive(Debug, Default)]
struct RawDocument {
    name: Option<String>,
    path: Vec<Coordinate>,
    annotations: Vec<Placemark>,
    dropped: usize,
}

impl RawDocument {
    fn into_track(self, opts: &ParseOptions) -> ParsedTrack {
        let explicit = !self.path.is_empty();

        let path = if explicit {
            self.path
        } else if self.annotations.len() >= 2 {
            let coords: Vec<Coordinate> = self.annotations.iter().map(|p| p.coordinate).collect();
            if coords.len() <= opts.reorder_max_points {
                debug!(
                    "No explicit path; reordering {} annotations by nearest neighbour",
                    coords.len()
                );
                nearest_neighbor_order(&coords)
            } else {
                debug!(
                    "No explicit path; {} annotations exceed reorder cap {}, keeping document order",
                    coords.len(),
                    opts.reorder_max_points
                );
                coords
            }
        } else {
            Vec::new()
        };

        if self.dropped > 0 {
            warn!("Dropped {} invalid coordinates while parsing", self.dropped);
        }

        ParsedTrack::new(self.name, path, self.annotations, explicit, self.dropped)
    }
}

/// Parse a <Placemark>. Paths go straight onto the document path; each
/// <Point> becomes an annotation carrying the placemark's name/description.
fn parse_placemark<'a>(
    reader: &mut Reader<&'a [u8]>,
    doc: &mut RawDocument,
    opts: &ParseOptions,
) -> Result<()> {
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;
    let mut points: Vec<Coordinate> = Vec::new();
    let mut extended = ExtendedData::default();
    let mut nested: usize = 0;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"name" => name = non_empty(read_text_owned(reader, &e)?),
                b"description" => description = non_empty(read_text_owned(reader, &e)?),
                b"Point" => {
                    if let Some(c) = parse_point(reader, doc, opts)? {
                        points.push(c);
                    }
                }
                b"LineString" => {
                    let path = parse_line_string(reader, doc, opts)?;
                    doc.path.extend(path);
                }
                b"Track" => {
                    let path = parse_gx_track(reader, doc, opts)?;
                    doc.path.extend(path);
                }
                b"ExtendedData" => extended.merge(parse_extended_data(reader)?),
                b"MultiGeometry" | b"MultiTrack" => nested += 1,
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(_) => {
                if nested == 0 {
                    break;
                }
                nested -= 1;
            }
            Event::Eof => return Err(MalformedDocumentError::UnexpectedEof),
            _ => {}
        }
    }

    let kind = extended
        .kind
        .unwrap_or_else(|| classify(name.as_deref(), &extended.attachments));
    for coordinate in points {
        doc.annotations.push(Placemark {
            name: name.clone(),
            description: description.clone(),
            coordinate,
            kind,
            attachments: extended.attachments.clone(),
        });
    }

    Ok(())
}

/// Parse a <Point>. Returns its first valid coordinate.
fn parse_point<'a>(
    reader: &mut Reader<&'a [u8]>,
    doc: &mut RawDocument,
    opts: &ParseOptions,
) -> Result<Option<Coordinate>> {
    let mut found: Option<Coordinate> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"coordinates" => {
                    let text = read_text_owned(reader, &e)?;
                    let coords = parse_coordinate_list(&text, opts, &mut doc.dropped);
                    if found.is_none() {
                        found = coords.into_iter().next();
                    }
                }
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(_) => break,
            Event::Eof => return Err(MalformedDocumentError::UnexpectedEof),
            _ => {}
        }
    }

    Ok(found)
}

/// Parse a <LineString> into its ordered coordinates.
fn parse_line_string<'a>(
    reader: &mut Reader<&'a [u8]>,
    doc: &mut RawDocument,
    opts: &ParseOptions,
) -> Result<Vec<Coordinate>> {
    let mut path = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"coordinates" => {
                    let text = read_text_owned(reader, &e)?;
                    path.extend(parse_coordinate_list(&text, opts, &mut doc.dropped));
                }
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(_) => break,
            Event::Eof => return Err(MalformedDocumentError::UnexpectedEof),
            _ => {}
        }
    }

    Ok(path)
}

/// Parse a <gx:Track>, whose <gx:coord> children hold "lng lat [alt]".
fn parse_gx_track<'a>(
    reader: &mut Reader<&'a [u8]>,
    doc: &mut RawDocument,
    opts: &ParseOptions,
) -> Result<Vec<Coordinate>> {
    let mut path = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"coord" => {
                    let text = read_text_owned(reader, &e)?;
                    if text.trim().is_empty() {
                        continue;
                    }
                    match parse_tuple(text.split_whitespace(), opts) {
                        Some(c) => path.push(c),
                        None => doc.dropped += 1,
                    }
                }
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(_) => break,
            Event::Eof => return Err(MalformedDocumentError::UnexpectedEof),
            _ => {}
        }
    }

    Ok(path)
}

#[derive(Default)]
struct ExtendedData {
    attachments: Vec<String>,
    kind: Option<PlacemarkKind>,
}

impl ExtendedData {
    fn merge(&mut self, other: ExtendedData) {
        self.attachments.extend(other.attachments);
        self.kind = other.kind.or(self.kind);
    }
}

/// Collect <ExtendedData>. Any <Data name="attachment..."> contributes its
/// <value> text; <Data name="kind"> overrides name-based classification.
fn parse_extended_data<'a>(reader: &mut Reader<&'a [u8]>) -> Result<ExtendedData> {
    let mut extended = ExtendedData::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let key = if e.local_name().as_ref() == b"Data" {
                    attribute_value(&e, b"name").map(|n| n.to_ascii_lowercase())
                } else {
                    None
                };
                match key.as_deref() {
                    Some(k) if k.starts_with("attachment") => {
                        extended.attachments.extend(parse_data_values(reader)?);
                    }
                    Some("kind") => {
                        let values = parse_data_values(reader)?;
                        if let Some(kind) = values.first().and_then(|v| PlacemarkKind::from_name(v)) {
                            extended.kind = Some(kind);
                        }
                    }
                    _ => {
                        reader.read_to_end(e.name())?;
                    }
                }
            }
            Event::End(_) => break,
            Event::Eof => return Err(MalformedDocumentError::UnexpectedEof),
            _ => {}
        }
    }

    Ok(extended)
}

fn parse_data_values<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Vec<String>> {
    let mut values = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"value" => {
                    if let Some(v) = non_empty(read_text_owned(reader, &e)?) {
                        values.push(v);
                    }
                }
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(_) => break,
            Event::Eof => return Err(MalformedDocumentError::UnexpectedEof),
            _ => {}
        }
    }

    Ok(values)
}

/// Parse whitespace-separated "lng,lat[,alt]" tuples. Tuples that fail to
/// parse or fall outside the valid range are skipped and counted.
fn parse_coordinate_list(text: &str, opts: &ParseOptions, dropped: &mut usize) -> Vec<Coordinate> {
    let mut coords = Vec::new();
    for tuple in text.split_whitespace() {
        match parse_tuple(tuple.split(','), opts) {
            Some(c) => coords.push(c),
            None => *dropped += 1,
        }
    }
    coords
}

fn parse_tuple<'s>(mut parts: impl Iterator<Item = &'s str>, opts: &ParseOptions) -> Option<Coordinate> {
    let lng = parts.next()?.trim().parse::<f64>().ok()?;
    let lat = parts.next()?.trim().parse::<f64>().ok()?;
    let alt = parts
        .next()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|_| opts.include_altitude);
    Coordinate::checked(lat, lng, alt)
}

fn classify(name: Option<&str>, attachments: &[String]) -> PlacemarkKind {
    let key = name.map(|n| n.trim().to_ascii_lowercase());
    match key.as_deref() {
        Some("起点" | "startpoint" | "start point" | "start") => PlacemarkKind::Start,
        Some("终点" | "endpoint" | "end point" | "end") => PlacemarkKind::End,
        _ if !attachments.is_empty() => PlacemarkKind::Attachment,
        _ => PlacemarkKind::Plain,
    }
}

fn attribute_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Read text content of an element as an owned String.
/// Handles regular text, CDATA sections, and entity references (Event::GeneralRef).
fn read_text_owned<'a>(reader: &mut Reader<&'a [u8]>, start: &BytesStart<'_>) -> Result<String> {
    let end_name = start.name().0.to_vec();
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                text.push_str(std::str::from_utf8(e.as_ref()).unwrap_or_default());
            }
            Event::CData(e) => {
                text.push_str(std::str::from_utf8(e.as_ref()).unwrap_or_default());
            }
            Event::GeneralRef(e) => {
                if let Ok(Some(ch)) = e.resolve_char_ref() {
                    text.push(ch);
                } else {
                    match std::str::from_utf8(e.as_ref()).unwrap_or_default() {
                        "amp" => text.push('&'),
                        "lt" => text.push('<'),
                        "gt" => text.push('>'),
                        "quot" => text.push('"'),
                        "apos" => text.push('\''),
                        _ => {}
                    }
                }
            }
            Event::End(e) if e.name().0 == end_name.as_slice() => break,
            Event::Eof => return Err(MalformedDocumentError::UnexpectedEof),
            _ => {}
        }
    }

    Ok(text)
}
