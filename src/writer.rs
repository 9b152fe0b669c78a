use std::io::{Cursor, Write};

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Deserialize;

use crate::error::DocumentWriteError;
use crate::geo_types::{Coordinate, ParsedTrack, Placemark, PlacemarkKind};

type Result<T> = std::result::Result<T, DocumentWriteError>;

const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

/// A user-authored route ready to be saved as KML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub path: Vec<Coordinate>,
    #[serde(default)]
    pub placemarks: Vec<Placemark>,
}

impl RouteDocument {
    /// Re-export a parsed track, e.g. after editing an import.
    pub fn from_track(track: &ParsedTrack) -> Self {
        Self {
            name: track.name().map(str::to_string),
            description: None,
            path: track.coordinates().collect(),
            placemarks: track.placemarks().to_vec(),
        }
    }
}

/// Serialise a route document as KML 2.2.
///
/// The path becomes one LineString placemark when it has at least two valid
/// points. Start/end placemarks are added from the path ends unless the
/// document already carries them. Invalid coordinates are skipped.
pub fn write_kml(doc: &RouteDocument) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut root = BytesStart::new("kml");
    root.push_attribute(("xmlns", KML_NAMESPACE));
    writer.write_event(Event::Start(root))?;
    writer.write_event(Event::Start(BytesStart::new("Document")))?;

    if let Some(name) = &doc.name {
        write_text_element(&mut writer, "name", name)?;
    }
    if let Some(description) = &doc.description {
        write_text_element(&mut writer, "description", description)?;
    }

    let path: Vec<Coordinate> = doc.path.iter().copied().filter(Coordinate::is_valid).collect();
    if path.len() >= 2 {
        writer.write_event(Event::Start(BytesStart::new("Placemark")))?;
        write_text_element(&mut writer, "name", doc.name.as_deref().unwrap_or("Route"))?;
        writer.write_event(Event::Start(BytesStart::new("LineString")))?;
        write_text_element(&mut writer, "tessellate", "1")?;
        let coordinates: Vec<String> = path.iter().map(format_coordinate).collect();
        write_text_element(&mut writer, "coordinates", &coordinates.join(" "))?;
        writer.write_event(Event::End(BytesEnd::new("LineString")))?;
        writer.write_event(Event::End(BytesEnd::new("Placemark")))?;

        let has_kind = |kind| doc.placemarks.iter().any(|p| p.kind == kind);
        if !has_kind(PlacemarkKind::Start) {
            write_endpoint(&mut writer, "startPoint", PlacemarkKind::Start, path[0])?;
        }
        if !has_kind(PlacemarkKind::End) {
            write_endpoint(&mut writer, "endPoint", PlacemarkKind::End, path[path.len() - 1])?;
        }
    }

    for placemark in doc.placemarks.iter().filter(|p| p.coordinate.is_valid()) {
        write_placemark(&mut writer, placemark)?;
    }

    writer.write_event(Event::End(BytesEnd::new("Document")))?;
    writer.write_event(Event::End(BytesEnd::new("kml")))?;

    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_endpoint<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    kind: PlacemarkKind,
    at: Coordinate,
) -> Result<()> {
    write_placemark(
        writer,
        &Placemark {
            name: Some(name.to_string()),
            kind,
            ..Placemark::new(at)
        },
    )
}

fn write_placemark<W: Write>(writer: &mut Writer<W>, placemark: &Placemark) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("Placemark")))?;
    if let Some(name) = &placemark.name {
        write_text_element(writer, "name", name)?;
    }
    if let Some(description) = &placemark.description {
        write_text_element(writer, "description", description)?;
    }
    // The kind is written explicitly so it survives names that don't classify.
    writer.write_event(Event::Start(BytesStart::new("ExtendedData")))?;
    write_data(writer, "kind", placemark.kind.as_str())?;
    for attachment in &placemark.attachments {
        write_data(writer, "attachment", attachment)?;
    }
    writer.write_event(Event::End(BytesEnd::new("ExtendedData")))?;
    writer.write_event(Event::Start(BytesStart::new("Point")))?;
    write_text_element(writer, "coordinates", &format_coordinate(&placemark.coordinate))?;
    writer.write_event(Event::End(BytesEnd::new("Point")))?;
    writer.write_event(Event::End(BytesEnd::new("Placemark")))?;
    Ok(())
}

fn write_data<W: Write>(writer: &mut Writer<W>, name: &str, value: &str) -> Result<()> {
    let mut data = BytesStart::new("Data");
    data.push_attribute(("name", name));
    writer.write_event(Event::Start(data))?;
    write_text_element(writer, "value", value)?;
    writer.write_event(Event::End(BytesEnd::new("Data")))?;
    Ok(())
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// "lng,lat" or "lng,lat,alt".
fn format_coordinate(c: &Coordinate) -> String {
    match c.altitude {
        Some(alt) => format!("{},{},{}", c.longitude, c.latitude, alt),
        None => format!("{},{}", c.longitude, c.latitude),
    }
}
