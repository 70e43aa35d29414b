// SPDX-License-Identifier: GPL-3.0-only
use anyhow::{Result, bail};
use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::collections::BTreeMap;
use tracing::debug;

use crate::catalog::ReleaseSet;
use crate::catalog::models::{Artifact, Category, OsType, SoftwareType};
use crate::error::ParseError;

const ROOT_TAG: &str = "root";
const DOCTYPE: &str = "tauLabssoftware";
const DATE_FORMAT: &str = "%d%m%Y";

const DESKTOP_SOFTWARE: [SoftwareType; 3] =
    [SoftwareType::Gcs, SoftwareType::SlimGcs, SoftwareType::Updater];
const EMBEDDED_SOFTWARE: [SoftwareType; 3] = [
    SoftwareType::Firmware,
    SoftwareType::Bootloader,
    SoftwareType::Settings,
];

/// Serialize a release set into the catalog document
pub fn encode(set: &ReleaseSet) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::DocType(BytesText::new(DOCTYPE)))?;
    writer.write_event(Event::Start(BytesStart::new(ROOT_TAG)))?;

    for category in Category::DOCUMENT_ORDER {
        let artifacts = match set.get(&category) {
            Some(artifacts) if !artifacts.is_empty() => artifacts,
            _ => continue,
        };
        for artifact in artifacts {
            if !artifact.is_well_formed() {
                bail!(
                    "Cannot encode {} artifact '{}' for {}",
                    artifact.software_type,
                    artifact.name,
                    artifact.os_type
                );
            }
        }

        writer.write_event(Event::Start(BytesStart::new(category.tag())))?;
        for os in OsType::ALL {
            let for_os: Vec<&Artifact> = artifacts.iter().filter(|a| a.os_type == os).collect();
            if for_os.is_empty() {
                continue;
            }
            writer.write_event(Event::Start(BytesStart::new(os.tag())))?;
            if os == OsType::Embedded {
                let mut by_hardware: BTreeMap<u16, Vec<&Artifact>> = BTreeMap::new();
                for artifact in for_os {
                    by_hardware.entry(artifact.hardware_type).or_default().push(artifact);
                }
                for (hardware_type, group) in by_hardware {
                    let tag = format!("t{}", hardware_type);
                    writer.write_event(Event::Start(BytesStart::new(tag.as_str())))?;
                    write_software_buckets(&mut writer, &group, &EMBEDDED_SOFTWARE)?;
                    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                }
            } else {
                write_software_buckets(&mut writer, &for_os, &DESKTOP_SOFTWARE)?;
            }
            writer.write_event(Event::End(BytesEnd::new(os.tag())))?;
        }
        writer.write_event(Event::End(BytesEnd::new(category.tag())))?;
    }

    writer.write_event(Event::End(BytesEnd::new(ROOT_TAG)))?;

    let mut document = String::from_utf8(writer.into_inner())?;
    document.push('\n');
    Ok(document)
}

fn write_software_buckets(
    writer: &mut Writer<Vec<u8>>,
    artifacts: &[&Artifact],
    order: &[SoftwareType],
) -> Result<()> {
    for software in order {
        let mut bucket: Vec<&Artifact> = artifacts
            .iter()
            .copied()
            .filter(|a| a.software_type == *software)
            .collect();
        if bucket.is_empty() {
            continue;
        }
        // Newest first; sort_by is stable so equal dates keep their order
        bucket.sort_by(|a, b| b.date.cmp(&a.date));

        writer.write_event(Event::Start(BytesStart::new(software.tag())))?;
        for artifact in bucket {
            write_leaf(writer, artifact)?;
        }
        writer.write_event(Event::End(BytesEnd::new(software.tag())))?;
    }
    Ok(())
}

fn write_leaf(writer: &mut Writer<Vec<u8>>, artifact: &Artifact) -> Result<()> {
    let tag = format!("d{}", artifact.date.format(DATE_FORMAT));
    let mut leaf = BytesStart::new(tag.as_str());
    leaf.push_attribute(("name", artifact.name.as_str()));
    leaf.push_attribute(("uvohash", artifact.uavo_hash.as_str()));
    leaf.push_attribute(("md5", artifact.md5.as_str()));
    leaf.push_attribute(("packageLink", artifact.package_link.as_str()));
    leaf.push_attribute(("releaseLink", artifact.release_link.as_str()));
    leaf.push_attribute(("scriptLink", artifact.script_link.as_str()));
    writer.write_event(Event::Empty(leaf))?;
    Ok(())
}

/// Element of the parsed document, with the byte offset of its tag
#[derive(Debug)]
struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    offset: usize,
    children: Vec<Node>,
}

impl Node {
    fn from_tag(tag: &BytesStart<'_>, offset: usize, source: &str) -> Result<Self, ParseError> {
        let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in tag.attributes() {
            let attribute = attribute
                .map_err(|e| ParseError::at_offset(source, offset, e.to_string()))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| ParseError::at_offset(source, offset, e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            offset,
            children: Vec::new(),
        })
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a catalog document into a release set
///
/// Any malformed markup or unknown tag rejects the whole document.
pub fn decode(source: &str) -> Result<ReleaseSet, ParseError> {
    let root = parse_tree(source)?;
    if root.name != ROOT_TAG {
        return Err(unknown_tag(source, &root, "root element"));
    }

    let mut set = ReleaseSet::new();
    for release in &root.children {
        let category = Category::from_tag(&release.name)
            .ok_or_else(|| unknown_tag(source, release, "release category"))?;
        let artifacts = set.entry(category).or_default();

        for os_node in &release.children {
            let os = OsType::from_tag(&os_node.name)
                .ok_or_else(|| unknown_tag(source, os_node, "operating system"))?;

            for child in &os_node.children {
                if os == OsType::Embedded {
                    let hardware_type = parse_hardware_tag(&child.name)
                        .ok_or_else(|| unknown_tag(source, child, "hardware type"))?;
                    for software_node in &child.children {
                        let software = SoftwareType::from_tag(&software_node.name)
                            .filter(|s| EMBEDDED_SOFTWARE.contains(s))
                            .ok_or_else(|| unknown_tag(source, software_node, "embedded software"))?;
                        for leaf in &software_node.children {
                            artifacts.push(decode_leaf(source, leaf, os, software, hardware_type)?);
                        }
                    }
                } else {
                    let software = SoftwareType::from_tag(&child.name)
                        .filter(|s| DESKTOP_SOFTWARE.contains(s))
                        .ok_or_else(|| unknown_tag(source, child, "desktop software"))?;
                    for leaf in &child.children {
                        artifacts.push(decode_leaf(source, leaf, os, software, 0)?);
                    }
                }
            }
        }
    }

    set.retain(|_, artifacts| !artifacts.is_empty());
    debug!(
        categories = set.len(),
        artifacts = set.values().map(Vec::len).sum::<usize>(),
        "Decoded catalog"
    );
    Ok(set)
}

fn decode_leaf(
    source: &str,
    leaf: &Node,
    os_type: OsType,
    software_type: SoftwareType,
    hardware_type: u16,
) -> Result<Artifact, ParseError> {
    let date = parse_date_tag(&leaf.name).ok_or_else(|| unknown_tag(source, leaf, "release date"))?;
    let text = |key: &str| leaf.attribute(key).unwrap_or_default().to_string();

    let uavo_hash = leaf
        .attribute("uvohash")
        .or_else(|| leaf.attribute("uavohash"))
        .unwrap_or_default()
        .to_string();

    Ok(Artifact {
        software_type,
        os_type,
        hardware_type,
        name: text("name"),
        uavo_hash,
        md5: text("md5"),
        package_link: text("packageLink"),
        release_link: text("releaseLink"),
        script_link: text("scriptLink"),
        date,
    })
}

fn parse_hardware_tag(tag: &str) -> Option<u16> {
    let digits = tag.strip_prefix('t')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_date_tag(tag: &str) -> Option<NaiveDate> {
    let digits = tag.strip_prefix('d')?;
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(digits, DATE_FORMAT).ok()
}

fn unknown_tag(source: &str, node: &Node, level: &str) -> ParseError {
    ParseError::at_offset(
        source,
        node.offset,
        format!("Unknown {} tag <{}>", level, node.name),
    )
}

fn parse_tree(source: &str) -> Result<Node, ParseError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseError::at_offset(source, reader.error_position() as usize, e.to_string()))?;
        // Points at the closing '>' of the tag just read
        let offset = (reader.buffer_position() as usize).saturating_sub(1);

        match event {
            Event::Start(ref tag) => {
                stack.push(Node::from_tag(tag, offset, source)?);
            }
            Event::Empty(ref tag) => {
                let node = Node::from_tag(tag, offset, source)?;
                attach(source, &mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ParseError::at_offset(source, offset, "Unexpected end tag"))?;
                attach(source, &mut stack, &mut root, node)?;
            }
            Event::Text(ref text) => {
                if stack.is_empty() && !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(ParseError::at_offset(
                        source,
                        offset,
                        "Text outside of the root element",
                    ));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::at_offset(
            source,
            source.len(),
            format!("Unexpected end of document, <{}> is not closed", open.name),
        ));
    }
    root.ok_or_else(|| ParseError::at_offset(source, source.len(), "Document has no root element"))
}

fn attach(
    source: &str,
    stack: &mut [Node],
    root: &mut Option<Node>,
    node: Node,
) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => {
            return Err(ParseError::at_offset(
                source,
                node.offset,
                "Document has more than one root element",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::artifact;

    fn sample_set() -> ReleaseSet {
        let mut set = ReleaseSet::new();
        set.insert(
            Category::Current,
            vec![
                artifact(SoftwareType::Firmware, OsType::Embedded, 136, "A", 2015, 2, 1),
                artifact(SoftwareType::Settings, OsType::Embedded, 136, "A", 2015, 11, 11),
                artifact(SoftwareType::Bootloader, OsType::Embedded, 4, "A", 2014, 6, 30),
                artifact(SoftwareType::Gcs, OsType::Linux64, 0, "A", 2015, 2, 1),
                artifact(SoftwareType::Updater, OsType::Linux64, 0, "", 2015, 1, 1),
            ],
        );
        set.insert(
            Category::Old,
            vec![
                artifact(SoftwareType::Gcs, OsType::Win64, 0, "Z", 2015, 2, 2),
                artifact(SoftwareType::Gcs, OsType::Win64, 0, "Y", 2014, 12, 24),
            ],
        );
        set.insert(
            Category::Test,
            vec![artifact(SoftwareType::SlimGcs, OsType::Osx64, 0, "B", 2015, 3, 1)],
        );
        set
    }

    fn sorted(mut artifacts: Vec<Artifact>) -> Vec<Artifact> {
        artifacts.sort_by(|a, b| {
            (a.software_type, a.os_type, a.hardware_type, a.date, &a.name)
                .cmp(&(b.software_type, b.os_type, b.hardware_type, b.date, &b.name))
        });
        artifacts
    }

    #[test]
    fn test_encode_decode_preserves_catalog() {
        let set = sample_set();
        let document = encode(&set).unwrap();
        let decoded = decode(&document).unwrap();

        assert_eq!(decoded.len(), set.len());
        for (category, artifacts) in &set {
            assert_eq!(
                sorted(decoded[category].clone()),
                sorted(artifacts.clone()),
                "category {}",
                category
            );
        }
    }

    #[test]
    fn test_encode_document_layout() {
        let document = encode(&sample_set()).unwrap();

        assert!(document.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(document.contains("<!DOCTYPE tauLabssoftware>"));
        assert!(document.contains("\n    <current_release>"));
        assert!(document.contains("\n        <embeded>"));
        assert!(document.contains("uvohash=\"A\""));

        let current = document.find("<current_release>").unwrap();
        let old = document.find("<old_release>").unwrap();
        let test = document.find("<test_release>").unwrap();
        assert!(current < old && old < test);

        let linux = document.find("<linux64>").unwrap();
        let embedded = document.find("<embeded>").unwrap();
        assert!(linux < embedded);

        let t4 = document.find("<t4>").unwrap();
        let t136 = document.find("<t136>").unwrap();
        assert!(t4 < t136);
    }

    #[test]
    fn test_encode_orders_leaves_newest_first() {
        let mut set = ReleaseSet::new();
        let mut first = artifact(SoftwareType::Gcs, OsType::Win32, 0, "A", 2015, 1, 1);
        first.name = "first".into();
        let mut second = first.clone();
        second.name = "second".into();
        let newest = artifact(SoftwareType::Gcs, OsType::Win32, 0, "A", 2016, 1, 1);
        let oldest = artifact(SoftwareType::Gcs, OsType::Win32, 0, "A", 2014, 1, 1);
        set.insert(
            Category::Current,
            vec![first.clone(), oldest.clone(), newest.clone(), second.clone()],
        );

        let decoded = decode(&encode(&set).unwrap()).unwrap();
        let names: Vec<&str> = decoded[&Category::Current].iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec![newest.name.as_str(), "first", "second", oldest.name.as_str()]);
    }

    #[test]
    fn test_encode_empty_set() {
        let document = encode(&ReleaseSet::new()).unwrap();
        assert!(decode(&document).unwrap().is_empty());
    }

    #[test]
    fn test_encode_rejects_ill_formed() {
        let mut set = ReleaseSet::new();
        set.insert(
            Category::Test,
            vec![artifact(SoftwareType::Firmware, OsType::Win32, 4, "A", 2015, 1, 1)],
        );
        assert!(encode(&set).is_err());
    }

    #[test]
    fn test_decode_hand_written_document() {
        let document = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE tauLabssoftware>
<root>
    <current_release>
        <embeded>
            <t136>
                <firmware>
                    <d01022015 name="fw" uavohash="abc" md5="m" packageLink="p" releaseLink="r" scriptLink=""/>
                </firmware>
            </t136>
        </embeded>
    </current_release>
</root>
"#;
        let set = decode(document).unwrap();
        let artifacts = &set[&Category::Current];
        assert_eq!(artifacts.len(), 1);

        let fw = &artifacts[0];
        assert_eq!(fw.software_type, SoftwareType::Firmware);
        assert_eq!(fw.os_type, OsType::Embedded);
        assert_eq!(fw.hardware_type, 136);
        assert_eq!(fw.uavo_hash, "abc");
        assert_eq!(fw.date, NaiveDate::from_ymd_opt(2015, 2, 1).unwrap());
        assert!(!fw.has_script());
    }

    #[test]
    fn test_decode_unknown_tag_reports_position() {
        let document = "<root>\n    <current_release>\n        <beos>\n        </beos>\n    </current_release>\n</root>\n";
        let err = decode(document).unwrap_err();

        assert!(err.message.contains("beos"));
        assert_eq!(err.line, 3);
        assert_eq!(err.context.len(), 3);
    }

    #[test]
    fn test_decode_tags_are_case_sensitive() {
        let document = "<root><Current_Release/></root>";
        assert!(decode(document).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_date() {
        let document = "<root><test_release><win32><gcs><d31022015 name=\"x\"/></gcs></win32></test_release></root>";
        let err = decode(document).unwrap_err();
        assert!(err.message.contains("d31022015"));
    }

    #[test]
    fn test_decode_rejects_software_under_wrong_os() {
        let document = "<root><test_release><win32><firmware/></win32></test_release></root>";
        assert!(decode(document).is_err());

        let document = "<root><test_release><embeded><gcs/></embeded></test_release></root>";
        assert!(decode(document).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_document() {
        let document = "<root>\n    <current_release>\n";
        let err = decode(document).unwrap_err();
        assert!(err.line >= 2);
        assert!(!err.context.is_empty());
    }

    #[test]
    fn test_decode_rejects_mismatched_end_tag() {
        let document = "<root>\n<old_release>\n</current_release>\n</root>";
        let err = decode(document).unwrap_err();
        assert!(err.line >= 2);
    }

    #[test]
    fn test_decode_rejects_text_outside_root() {
        assert!(decode("é<root/>").is_err());
        assert!(decode("<root/>\nété").is_err());
    }
}
