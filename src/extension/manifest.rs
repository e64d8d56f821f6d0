//! Android binary XML (AXML) manifest decoding
//!
//! APKs store `AndroidManifest.xml` compiled into a chunked little-endian format: a
//! string pool, an optional resource-id map, then a flat stream of namespace and
//! element chunks. This module rebuilds the element tree from that stream and extracts
//! the identity an extension declares:
//!
//! ```xml
//! <manifest package="eu.kanade.tachiyomi.extension.en.example" android:versionCode="12" android:versionName="1.4.12">
//!   <uses-feature android:name="tachiyomi.extension" />
//!   <application android:label="Tachiyomi: Example">
//!     <meta-data android:name="tachiyomi.extension.class" android:value=".Example" />
//!     <meta-data android:name="tachiyomi.extension.nsfw" android:value="0" />
//!   </application>
//! </manifest>
//! ```

use std::fmt;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use crate::core::error::{BridgeError, Result};

const RES_XML_TYPE: u16 = 0x0003;
const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;
const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
const RES_XML_CDATA_TYPE: u16 = 0x0104;

const UTF8_FLAG: u32 = 1 << 8;
const NO_INDEX: u32 = 0xFFFF_FFFF;

const TYPE_NULL: u8 = 0x00;
const TYPE_REFERENCE: u8 = 0x01;
const TYPE_ATTRIBUTE: u8 = 0x02;
const TYPE_STRING: u8 = 0x03;
const TYPE_FLOAT: u8 = 0x04;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;
const TYPE_INT_BOOLEAN: u8 = 0x12;

pub const EXTENSION_FEATURE: &str = "tachiyomi.extension";
pub const METADATA_SOURCE_CLASS: &str = "tachiyomi.extension.class";
pub const METADATA_NSFW: &str = "tachiyomi.extension.nsfw";

/// Framework attribute names for obfuscated manifests whose pool strings were blanked
fn framework_attr_name(resource_id: u32) -> Option<&'static str> {
    match resource_id {
        0x0101_0001 => Some("label"),
        0x0101_0002 => Some("icon"),
        0x0101_0003 => Some("name"),
        0x0101_0024 => Some("value"),
        0x0101_021b => Some("versionCode"),
        0x0101_021c => Some("versionName"),
        _ => None,
    }
}

/// Typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Str(String),
    Int(i64),
    Hex(u32),
    Bool(bool),
    Float(f32),
    /// Resource or theme-attribute reference, unresolved without `resources.arsc`
    Reference(u32),
    Other { data_type: u8, data: u32 },
}

impl AttrValue {
    /// Textual form, as Android would expose it through `getString`
    pub fn as_string(&self) -> Option<String> {
        match self {
            AttrValue::Str(s) => Some(s.clone()),
            AttrValue::Int(v) => Some(v.to_string()),
            AttrValue::Hex(v) => Some(v.to_string()),
            AttrValue::Bool(v) => Some(v.to_string()),
            AttrValue::Float(v) => Some(v.to_string()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Hex(v) => Some(*v as i64),
            AttrValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, AttrValue::Reference(_))
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => Ok(()),
            AttrValue::Str(s) => write!(f, "{}", s),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Hex(v) => write!(f, "0x{:08x}", v),
            AttrValue::Bool(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Reference(id) => write!(f, "@0x{:08x}", id),
            AttrValue::Other { data_type, data } => write!(f, "(type 0x{:02x})0x{:08x}", data_type, data),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlAttribute {
    pub namespace_uri: Option<String>,
    pub name: String,
    pub value: AttrValue,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub namespace_uri: Option<String>,
    pub name: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlElement>,
    pub text: Option<String>,
}

impl XmlElement {
    /// Attribute by local name, ignoring its namespace
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

/// Decoded manifest tree
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub namespaces: Vec<Namespace>,
    pub root: XmlElement,
}

impl XmlDocument {
    fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.namespaces
            .iter()
            .find(|ns| ns.uri == uri)
            .map(|ns| ns.prefix.as_str())
    }

    /// Render the tree as indented XML text
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(render_err)?;

        self.write_element(&mut writer, &self.root, true)?;

        String::from_utf8(writer.into_inner())
            .map_err(|e| BridgeError::Manifest(format!("Rendered XML is not UTF-8: {}", e)))
    }

    fn write_element(&self, writer: &mut Writer<Vec<u8>>, element: &XmlElement, is_root: bool) -> Result<()> {
        let qualified = |uri: &Option<String>, name: &str| match uri.as_deref().and_then(|u| self.prefix_for(u)) {
            Some(prefix) => format!("{}:{}", prefix, name),
            None => name.to_string(),
        };

        let tag = qualified(&element.namespace_uri, &element.name);
        let mut start = BytesStart::new(tag.clone());

        if is_root {
            for ns in &self.namespaces {
                let key = format!("xmlns:{}", ns.prefix);
                start.push_attribute((key.as_str(), ns.uri.as_str()));
            }
        }

        for attr in &element.attributes {
            let key = qualified(&attr.namespace_uri, &attr.name);
            let value = attr.value.to_string();
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if element.children.is_empty() && element.text.is_none() {
            writer.write_event(Event::Empty(start)).map_err(render_err)?;
            return Ok(());
        }

        writer.write_event(Event::Start(start)).map_err(render_err)?;
        if let Some(text) = &element.text {
            writer
                .write_event(Event::Text(quick_xml::events::BytesText::new(text)))
                .map_err(render_err)?;
        }
        for child in &element.children {
            self.write_element(writer, child, false)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(render_err)?;

        Ok(())
    }
}

fn render_err(e: impl fmt::Display) -> BridgeError {
    BridgeError::Manifest(format!("Failed to render XML: {}", e))
}

/// Identity an extension declares in its manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestInfo {
    pub package: String,
    pub version_code: i64,
    pub version_name: String,
    /// Literal application label; `None` when absent or a resource reference
    pub label: Option<String>,
    pub is_extension: bool,
    /// Source classes, already resolved against the package
    pub extension_classes: Vec<String>,
    pub is_nsfw: bool,
}

impl ManifestInfo {
    pub fn entry_class(&self) -> Option<&str> {
        self.extension_classes.first().map(String::as_str)
    }

    pub fn from_document(doc: &XmlDocument) -> Result<Self> {
        let root = &doc.root;
        if root.name != "manifest" {
            return Err(BridgeError::Manifest(format!(
                "unexpected root element <{}>",
                root.name
            )));
        }

        let package = root
            .attr("package")
            .and_then(AttrValue::as_string)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| BridgeError::Manifest("manifest declares no package".to_string()))?;

        let version_code = root.attr("versionCode").and_then(AttrValue::as_int).unwrap_or(0);
        let version_name = root
            .attr("versionName")
            .and_then(AttrValue::as_string)
            .unwrap_or_default();

        let is_extension = root.children_named("uses-feature").any(|f| {
            f.attr("name").and_then(AttrValue::as_string).as_deref() == Some(EXTENSION_FEATURE)
        });

        let mut info = ManifestInfo {
            package,
            version_code,
            version_name,
            label: None,
            is_extension,
            extension_classes: Vec::new(),
            is_nsfw: false,
        };

        if let Some(application) = root.children_named("application").next() {
            info.label = application
                .attr("label")
                .filter(|v| !v.is_reference())
                .and_then(AttrValue::as_string);

            for meta in application.children_named("meta-data") {
                let name = meta.attr("name").and_then(AttrValue::as_string);
                let value = meta.attr("value").and_then(AttrValue::as_string);

                match (name.as_deref(), value) {
                    (Some(METADATA_SOURCE_CLASS), Some(value)) => {
                        info.extension_classes = value
                            .split(';')
                            .map(str::trim)
                            .filter(|c| !c.is_empty())
                            .map(|c| resolve_class_name(&info.package, c))
                            .collect();
                    }
                    (Some(METADATA_NSFW), Some(value)) => {
                        info.is_nsfw = value == "1" || value.eq_ignore_ascii_case("true");
                    }
                    _ => {}
                }
            }
        }

        Ok(info)
    }
}

/// Expand a package-relative class name (`.Foo`) to its fully-qualified form
pub fn resolve_class_name(package: &str, class_name: &str) -> String {
    if class_name.starts_with('.') {
        format!("{}{}", package, class_name)
    } else {
        class_name.to_string()
    }
}

/// Decode and interpret a binary manifest in one step
pub fn parse_manifest(data: &[u8]) -> Result<ManifestInfo> {
    ManifestInfo::from_document(&decode(data)?)
}

fn malformed(what: impl fmt::Display) -> BridgeError {
    BridgeError::Manifest(format!("malformed binary XML: {}", what))
}

fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    data.get(offset)
        .copied()
        .ok_or_else(|| malformed(format!("read past end at {}", offset)))
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| malformed(format!("read past end at {}", offset)))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| malformed(format!("read past end at {}", offset)))
}

#[derive(Debug, Default)]
struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    fn parse(chunk: &[u8]) -> Result<Self> {
        let header_size = read_u16(chunk, 2)? as usize;
        let string_count = read_u32(chunk, 8)? as usize;
        let flags = read_u32(chunk, 16)?;
        let strings_start = read_u32(chunk, 20)? as usize;
        let utf8 = flags & UTF8_FLAG != 0;

        if string_count > chunk.len() / 4 {
            return Err(malformed(format!("string count {} exceeds pool size", string_count)));
        }

        let mut strings = Vec::with_capacity(string_count);
        for i in 0..string_count {
            let offset = strings_start + read_u32(chunk, header_size + i * 4)? as usize;
            let value = if utf8 {
                Self::read_utf8(chunk, offset)?
            } else {
                Self::read_utf16(chunk, offset)?
            };
            strings.push(value);
        }

        Ok(Self { strings })
    }

    /// Lengths are 1 or 2 bytes; a set high bit marks the long form
    fn read_utf8_len(chunk: &[u8], offset: usize) -> Result<(usize, usize)> {
        let first = read_u8(chunk, offset)? as usize;
        if first & 0x80 != 0 {
            let second = read_u8(chunk, offset + 1)? as usize;
            Ok((((first & 0x7f) << 8) | second, 2))
        } else {
            Ok((first, 1))
        }
    }

    fn read_utf8(chunk: &[u8], offset: usize) -> Result<String> {
        // UTF-16 length first, then the UTF-8 byte length we actually need
        let (_, skip) = Self::read_utf8_len(chunk, offset)?;
        let (len, skip2) = Self::read_utf8_len(chunk, offset + skip)?;
        let start = offset + skip + skip2;
        let bytes = chunk
            .get(start..start + len)
            .ok_or_else(|| malformed("UTF-8 string past end of pool"))?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_utf16(chunk: &[u8], offset: usize) -> Result<String> {
        let first = read_u16(chunk, offset)? as usize;
        let (len, skip) = if first & 0x8000 != 0 {
            let second = read_u16(chunk, offset + 2)? as usize;
            (((first & 0x7fff) << 16) | second, 4)
        } else {
            (first, 2)
        };

        let start = offset + skip;
        let bytes = chunk
            .get(start..start + len * 2)
            .ok_or_else(|| malformed("UTF-16 string past end of pool"))?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    fn get(&self, index: u32) -> Option<&str> {
        if index == NO_INDEX {
            return None;
        }
        self.strings.get(index as usize).map(String::as_str)
    }
}

struct Decoder<'a> {
    data: &'a [u8],
    pool: StringPool,
    resource_ids: Vec<u32>,
    namespaces: Vec<Namespace>,
    stack: Vec<XmlElement>,
    root: Option<XmlElement>,
}

impl<'a> Decoder<'a> {
    fn string(&self, index: u32) -> Option<String> {
        self.pool.get(index).map(str::to_string)
    }

    fn attribute_name(&self, index: u32) -> String {
        match self.pool.get(index) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => match self.resource_ids.get(index as usize) {
                Some(&id) => framework_attr_name(id)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("attr_{:08x}", id)),
                None => format!("attr_{}", index),
            },
        }
    }

    fn typed_value(&self, raw: u32, data_type: u8, data: u32) -> AttrValue {
        match data_type {
            TYPE_STRING => self
                .string(if raw != NO_INDEX { raw } else { data })
                .map(AttrValue::Str)
                .unwrap_or(AttrValue::Null),
            TYPE_INT_DEC => AttrValue::Int(data as i32 as i64),
            TYPE_INT_HEX => AttrValue::Hex(data),
            TYPE_INT_BOOLEAN => AttrValue::Bool(data != 0),
            TYPE_REFERENCE | TYPE_ATTRIBUTE => AttrValue::Reference(data),
            TYPE_FLOAT => AttrValue::Float(f32::from_bits(data)),
            TYPE_NULL => match self.string(raw) {
                Some(s) => AttrValue::Str(s),
                None => AttrValue::Null,
            },
            other => AttrValue::Other { data_type: other, data },
        }
    }

    fn start_element(&mut self, offset: usize, header_size: usize) -> Result<()> {
        let body = offset + header_size;
        let ns = read_u32(self.data, body)?;
        let name = read_u32(self.data, body + 4)?;
        let attr_start = read_u16(self.data, body + 8)? as usize;
        let attr_size = read_u16(self.data, body + 10)? as usize;
        let attr_count = read_u16(self.data, body + 12)? as usize;

        if attr_count > 0 && attr_size < 20 {
            return Err(malformed(format!("attribute size {} too small", attr_size)));
        }

        let mut element = XmlElement {
            namespace_uri: self.string(ns),
            name: self.string(name).unwrap_or_default(),
            ..Default::default()
        };

        for i in 0..attr_count {
            let at = body + attr_start + i * attr_size;
            let attr_ns = read_u32(self.data, at)?;
            let attr_name = read_u32(self.data, at + 4)?;
            let raw = read_u32(self.data, at + 8)?;
            let data_type = read_u8(self.data, at + 15)?;
            let data = read_u32(self.data, at + 16)?;

            element.attributes.push(XmlAttribute {
                namespace_uri: self.string(attr_ns),
                name: self.attribute_name(attr_name),
                value: self.typed_value(raw, data_type, data),
            });
        }

        self.stack.push(element);
        Ok(())
    }

    fn end_element(&mut self) -> Result<()> {
        let element = self
            .stack
            .pop()
            .ok_or_else(|| malformed("end element without start"))?;

        match self.stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if self.root.is_none() => self.root = Some(element),
            None => return Err(malformed("multiple root elements")),
        }
        Ok(())
    }

    fn run(mut self) -> Result<XmlDocument> {
        if read_u16(self.data, 0)? != RES_XML_TYPE {
            return Err(BridgeError::Manifest("not a binary XML document".to_string()));
        }

        let total = (read_u32(self.data, 4)? as usize).min(self.data.len());
        let mut offset = read_u16(self.data, 2)? as usize;

        while offset + 8 <= total {
            let chunk_type = read_u16(self.data, offset)?;
            let header_size = read_u16(self.data, offset + 2)? as usize;
            let chunk_size = read_u32(self.data, offset + 4)? as usize;

            if chunk_size < 8 || offset + chunk_size > total {
                return Err(malformed(format!("bad chunk size {} at offset {}", chunk_size, offset)));
            }

            match chunk_type {
                RES_STRING_POOL_TYPE => {
                    self.pool = StringPool::parse(&self.data[offset..offset + chunk_size])?;
                }
                RES_XML_RESOURCE_MAP_TYPE => {
                    self.resource_ids = (offset + header_size..offset + chunk_size)
                        .step_by(4)
                        .map(|at| read_u32(self.data, at))
                        .collect::<Result<_>>()?;
                }
                RES_XML_START_NAMESPACE_TYPE => {
                    let body = offset + header_size;
                    let prefix = self.string(read_u32(self.data, body)?).unwrap_or_default();
                    let uri = self.string(read_u32(self.data, body + 4)?).unwrap_or_default();
                    if !self.namespaces.iter().any(|ns| ns.uri == uri) {
                        self.namespaces.push(Namespace { prefix, uri });
                    }
                }
                RES_XML_START_ELEMENT_TYPE => self.start_element(offset, header_size)?,
                RES_XML_END_ELEMENT_TYPE => self.end_element()?,
                RES_XML_CDATA_TYPE => {
                    let text = self.string(read_u32(self.data, offset + header_size)?);
                    if let (Some(current), Some(text)) = (self.stack.last_mut(), text) {
                        current.text.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                RES_XML_END_NAMESPACE_TYPE => {}
                other => tracing::trace!(chunk_type = other, "Skipping unknown AXML chunk"),
            }

            offset += chunk_size;
        }

        if !self.stack.is_empty() {
            return Err(malformed("unterminated element"));
        }

        let root = self
            .root
            .ok_or_else(|| BridgeError::Manifest("document has no root element".to_string()))?;

        Ok(XmlDocument {
            namespaces: self.namespaces,
            root,
        })
    }
}

/// Decode a binary XML document into an element tree
pub fn decode(data: &[u8]) -> Result<XmlDocument> {
    Decoder {
        data,
        pool: StringPool::default(),
        resource_ids: Vec::new(),
        namespaces: Vec::new(),
        stack: Vec::new(),
        root: None,
    }
    .run()
}
