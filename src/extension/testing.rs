//! Test doubles for the foreign runtime and APK fixtures

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use zip::write::SimpleFileOptions;

use crate::core::error::{BridgeError, Result};
use crate::core::http::{HttpClient, HttpResponse};
use crate::extension::converter::BytecodeConverter;
use crate::extension::foreign::*;

pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

pub use crate::extension::convert::{FILTER_LIST_CLASS, SCHAPTER_CLASS, SMANGA_CLASS};

pub const CATALOGUE_SOURCE_IFACE: &str = "eu.kanade.tachiyomi.source.CatalogueSource";
pub const SOURCE_FACTORY_IFACE: &str = "eu.kanade.tachiyomi.source.SourceFactory";

// ---------------------------------------------------------------------------
// Binary XML encoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum TestValue {
    Str(String),
    Int(i32),
    Bool(bool),
    Ref(u32),
}

impl TestValue {
    pub fn str(value: &str) -> Self {
        TestValue::Str(value.to_string())
    }
}

pub type TestAttr<'a> = (Option<&'a str>, &'a str, TestValue);

const FRAMEWORK_NAMES: &[(&str, u32)] = &[
    ("label", 0x0101_0001),
    ("name", 0x0101_0003),
    ("value", 0x0101_0024),
    ("versionCode", 0x0101_021b),
    ("versionName", 0x0101_021c),
];

/// Minimal AXML writer producing the chunk layout aapt emits
pub struct AxmlWriter {
    utf8: bool,
    strings: Vec<String>,
    resource_ids: Vec<u32>,
    nodes: Vec<u8>,
}

impl AxmlWriter {
    pub fn new(utf8: bool) -> Self {
        Self {
            utf8,
            strings: Vec::new(),
            resource_ids: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Writer whose framework attribute names are blanked and only reachable through the resource map
    pub fn obfuscated(utf8: bool) -> Self {
        let mut writer = Self::new(utf8);
        for (_, id) in FRAMEWORK_NAMES {
            writer.strings.push(String::new());
            writer.resource_ids.push(*id);
        }
        writer
    }

    fn intern(&mut self, value: &str) -> u32 {
        let first = self.resource_ids.len();
        if let Some(pos) = self.strings[first..].iter().position(|s| s == value) {
            return (first + pos) as u32;
        }
        self.strings.push(value.to_string());
        (self.strings.len() - 1) as u32
    }

    fn attr_name(&mut self, name: &str) -> u32 {
        if let Some(slot) = FRAMEWORK_NAMES.iter().position(|(n, _)| *n == name) {
            if slot < self.resource_ids.len() {
                return slot as u32;
            }
        }
        self.intern(name)
    }

    fn opt_intern(&mut self, value: Option<&str>) -> u32 {
        value.map(|v| self.intern(v)).unwrap_or(u32::MAX)
    }

    fn node_header(&mut self, chunk_type: u16, size: u32) {
        self.nodes.extend_from_slice(&chunk_type.to_le_bytes());
        self.nodes.extend_from_slice(&16u16.to_le_bytes());
        self.nodes.extend_from_slice(&size.to_le_bytes());
        self.nodes.extend_from_slice(&1u32.to_le_bytes());
        self.nodes.extend_from_slice(&u32::MAX.to_le_bytes());
    }

    pub fn start_namespace(&mut self, prefix: &str, uri: &str) {
        let prefix = self.intern(prefix);
        let uri = self.intern(uri);
        self.node_header(0x0100, 24);
        self.nodes.extend_from_slice(&prefix.to_le_bytes());
        self.nodes.extend_from_slice(&uri.to_le_bytes());
    }

    pub fn end_namespace(&mut self, prefix: &str, uri: &str) {
        let prefix = self.intern(prefix);
        let uri = self.intern(uri);
        self.node_header(0x0101, 24);
        self.nodes.extend_from_slice(&prefix.to_le_bytes());
        self.nodes.extend_from_slice(&uri.to_le_bytes());
    }

    pub fn start_element(&mut self, name: &str, attrs: &[TestAttr<'_>]) {
        let name = self.intern(name);

        let mut encoded = Vec::new();
        for (ns, attr, value) in attrs {
            let ns = self.opt_intern(*ns);
            let attr = self.attr_name(attr);
            let (raw, data_type, data) = match value {
                TestValue::Str(s) => {
                    let idx = self.intern(s);
                    (idx, 0x03u8, idx)
                }
                TestValue::Int(v) => (u32::MAX, 0x10, *v as u32),
                TestValue::Bool(v) => (u32::MAX, 0x12, if *v { u32::MAX } else { 0 }),
                TestValue::Ref(id) => (u32::MAX, 0x01, *id),
            };
            encoded.extend_from_slice(&ns.to_le_bytes());
            encoded.extend_from_slice(&attr.to_le_bytes());
            encoded.extend_from_slice(&raw.to_le_bytes());
            encoded.extend_from_slice(&8u16.to_le_bytes());
            encoded.push(0);
            encoded.push(data_type);
            encoded.extend_from_slice(&data.to_le_bytes());
        }

        self.node_header(0x0102, (16 + 20 + encoded.len()) as u32);
        self.nodes.extend_from_slice(&u32::MAX.to_le_bytes());
        self.nodes.extend_from_slice(&name.to_le_bytes());
        self.nodes.extend_from_slice(&20u16.to_le_bytes());
        self.nodes.extend_from_slice(&20u16.to_le_bytes());
        self.nodes.extend_from_slice(&(attrs.len() as u16).to_le_bytes());
        self.nodes.extend_from_slice(&[0u8; 6]);
        self.nodes.extend_from_slice(&encoded);
    }

    pub fn end_element(&mut self, name: &str) {
        let name = self.intern(name);
        self.node_header(0x0103, 24);
        self.nodes.extend_from_slice(&u32::MAX.to_le_bytes());
        self.nodes.extend_from_slice(&name.to_le_bytes());
    }

    fn len8(len: usize, out: &mut Vec<u8>) {
        if len > 0x7f {
            out.push(((len >> 8) as u8) | 0x80);
            out.push(len as u8);
        } else {
            out.push(len as u8);
        }
    }

    fn string_pool(&self) -> Vec<u8> {
        let mut offsets = Vec::new();
        let mut data = Vec::new();

        for s in &self.strings {
            offsets.extend_from_slice(&(data.len() as u32).to_le_bytes());
            if self.utf8 {
                Self::len8(s.encode_utf16().count(), &mut data);
                Self::len8(s.len(), &mut data);
                data.extend_from_slice(s.as_bytes());
                data.push(0);
            } else {
                let units: Vec<u16> = s.encode_utf16().collect();
                data.extend_from_slice(&(units.len() as u16).to_le_bytes());
                for unit in units {
                    data.extend_from_slice(&unit.to_le_bytes());
                }
                data.extend_from_slice(&0u16.to_le_bytes());
            }
        }
        while data.len() % 4 != 0 {
            data.push(0);
        }

        let strings_start = 28 + offsets.len();
        let size = strings_start + data.len();
        let flags: u32 = if self.utf8 { 1 << 8 } else { 0 };

        let mut chunk = Vec::with_capacity(size);
        chunk.extend_from_slice(&0x0001u16.to_le_bytes());
        chunk.extend_from_slice(&28u16.to_le_bytes());
        chunk.extend_from_slice(&(size as u32).to_le_bytes());
        chunk.extend_from_slice(&(self.strings.len() as u32).to_le_bytes());
        chunk.extend_from_slice(&0u32.to_le_bytes());
        chunk.extend_from_slice(&flags.to_le_bytes());
        chunk.extend_from_slice(&(strings_start as u32).to_le_bytes());
        chunk.extend_from_slice(&0u32.to_le_bytes());
        chunk.extend_from_slice(&offsets);
        chunk.extend_from_slice(&data);
        chunk
    }

    pub fn finish(self) -> Vec<u8> {
        let pool = self.string_pool();

        let mut resource_map = Vec::new();
        if !self.resource_ids.is_empty() {
            resource_map.extend_from_slice(&0x0180u16.to_le_bytes());
            resource_map.extend_from_slice(&8u16.to_le_bytes());
            resource_map.extend_from_slice(&((8 + 4 * self.resource_ids.len()) as u32).to_le_bytes());
            for id in &self.resource_ids {
                resource_map.extend_from_slice(&id.to_le_bytes());
            }
        }

        let total = 8 + pool.len() + resource_map.len() + self.nodes.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&0x0003u16.to_le_bytes());
        out.extend_from_slice(&8u16.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&pool);
        out.extend_from_slice(&resource_map);
        out.extend_from_slice(&self.nodes);
        out
    }
}

enum FixtureLabel {
    Text(String),
    Reference(u32),
}

/// Builder for a typical extension manifest
pub struct ManifestFixture {
    package: String,
    version_name: String,
    version_code: i32,
    label: Option<FixtureLabel>,
    classes: Option<String>,
    nsfw: Option<String>,
    feature: bool,
    utf8: bool,
    obfuscated: bool,
}

impl ManifestFixture {
    pub fn new(package: &str, version_name: &str, version_code: i32) -> Self {
        Self {
            package: package.to_string(),
            version_name: version_name.to_string(),
            version_code,
            label: None,
            classes: None,
            nsfw: None,
            feature: true,
            utf8: false,
            obfuscated: false,
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(FixtureLabel::Text(label.to_string()));
        self
    }

    pub fn label_reference(mut self, id: u32) -> Self {
        self.label = Some(FixtureLabel::Reference(id));
        self
    }

    pub fn classes(mut self, classes: &str) -> Self {
        self.classes = Some(classes.to_string());
        self
    }

    pub fn nsfw(mut self, value: &str) -> Self {
        self.nsfw = Some(value.to_string());
        self
    }

    pub fn without_feature(mut self) -> Self {
        self.feature = false;
        self
    }

    pub fn utf8(mut self) -> Self {
        self.utf8 = true;
        self
    }

    pub fn obfuscated(mut self) -> Self {
        self.obfuscated = true;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = if self.obfuscated {
            AxmlWriter::obfuscated(self.utf8)
        } else {
            AxmlWriter::new(self.utf8)
        };
        let android = Some(ANDROID_NS);

        w.start_namespace("android", ANDROID_NS);
        w.start_element(
            "manifest",
            &[
                (None, "package", TestValue::str(&self.package)),
                (android, "versionCode", TestValue::Int(self.version_code)),
                (android, "versionName", TestValue::str(&self.version_name)),
            ],
        );

        if self.feature {
            w.start_element("uses-feature", &[(android, "name", TestValue::str("tachiyomi.extension"))]);
            w.end_element("uses-feature");
        }

        let label = match &self.label {
            Some(FixtureLabel::Text(text)) => vec![(android, "label", TestValue::str(text))],
            Some(FixtureLabel::Reference(id)) => vec![(android, "label", TestValue::Ref(*id))],
            None => vec![],
        };
        w.start_element("application", &label);

        if let Some(classes) = &self.classes {
            w.start_element(
                "meta-data",
                &[
                    (android, "name", TestValue::str("tachiyomi.extension.class")),
                    (android, "value", TestValue::str(classes)),
                ],
            );
            w.end_element("meta-data");
        }
        if let Some(nsfw) = &self.nsfw {
            w.start_element(
                "meta-data",
                &[
                    (android, "name", TestValue::str("tachiyomi.extension.nsfw")),
                    (android, "value", TestValue::str(nsfw)),
                ],
            );
            w.end_element("meta-data");
        }

        w.end_element("application");
        w.end_element("manifest");
        w.end_namespace("android", ANDROID_NS);
        w.finish()
    }
}

// ---------------------------------------------------------------------------
// APK fixtures
// ---------------------------------------------------------------------------

pub const FAKE_DEX: &[u8] = b"dex\n035\0fake-bytecode";

/// Zip archive builder standing in for a packaged extension
#[derive(Default)]
pub struct ApkBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl ApkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard extension layout: manifest plus bytecode
    pub fn extension(manifest: &ManifestFixture) -> Self {
        Self::new().manifest(manifest.encode()).dex()
    }

    pub fn manifest(self, bytes: Vec<u8>) -> Self {
        self.entry("AndroidManifest.xml", &bytes)
    }

    pub fn dex(self) -> Self {
        self.entry("classes.dex", FAKE_DEX)
    }

    pub fn entry(mut self, name: &str, bytes: &[u8]) -> Self {
        self.entries.push((name.to_string(), bytes.to_vec()));
        self
    }

    pub fn write(&self, path: &Path) -> PathBuf {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, bytes) in &self.entries {
            zip.start_file(name.as_str(), SimpleFileOptions::default()).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap();
        path.to_path_buf()
    }
}

/// Write a loadable extension APK declaring `entry_class`
pub fn write_extension_apk(dir: &Path, package: &str, version_name: &str, version_code: i32, entry_class: &str) -> PathBuf {
    let manifest = ManifestFixture::new(package, version_name, version_code)
        .label(&format!("Tachiyomi: {}", package.rsplit('.').next().unwrap_or(package)))
        .classes(entry_class);
    ApkBuilder::extension(&manifest).write(&dir.join(format!("{}.apk", package)))
}

// ---------------------------------------------------------------------------
// Foreign runtime fakes
// ---------------------------------------------------------------------------

pub type MethodImpl = Arc<dyn Fn(&FakeObject, &[ForeignValue]) -> std::result::Result<ForeignValue, ForeignError> + Send + Sync>;
pub type StaticImpl = Arc<dyn Fn(&[ForeignValue]) -> std::result::Result<ForeignValue, ForeignError> + Send + Sync>;
pub type CtorImpl = Arc<dyn Fn(&[ForeignValue]) -> std::result::Result<ForeignRef, ForeignError> + Send + Sync>;

/// Scripted foreign object. `getX`/`setX` calls fall through to field `x`.
pub struct FakeObject {
    class_name: String,
    interfaces: Vec<String>,
    fields: Mutex<BTreeMap<String, ForeignValue>>,
    methods: BTreeMap<String, (usize, MethodImpl)>,
    calls: Mutex<Vec<String>>,
}

pub struct FakeObjectBuilder {
    class_name: String,
    interfaces: Vec<String>,
    fields: BTreeMap<String, ForeignValue>,
    methods: BTreeMap<String, (usize, MethodImpl)>,
}

impl FakeObjectBuilder {
    pub fn interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn field(mut self, name: &str, value: impl Into<ForeignValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn null_field(mut self, name: &str) -> Self {
        self.fields.insert(name.to_string(), ForeignValue::Null);
        self
    }

    pub fn method<F>(mut self, name: &str, arity: usize, f: F) -> Self
    where
        F: Fn(&FakeObject, &[ForeignValue]) -> std::result::Result<ForeignValue, ForeignError> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), (arity, Arc::new(f)));
        self
    }

    pub fn without_method(mut self, name: &str) -> Self {
        self.methods.remove(name);
        self
    }

    pub fn build(self) -> Arc<FakeObject> {
        Arc::new(FakeObject {
            class_name: self.class_name,
            interfaces: self.interfaces,
            fields: Mutex::new(self.fields),
            methods: self.methods,
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl FakeObject {
    pub fn builder(class_name: &str) -> FakeObjectBuilder {
        FakeObjectBuilder {
            class_name: class_name.to_string(),
            interfaces: Vec::new(),
            fields: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }

    pub fn value(&self, name: &str) -> ForeignValue {
        self.fields
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(ForeignValue::Null)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn accessor_field(prefix: &str, name: &str) -> Option<String> {
        let rest = name.strip_prefix(prefix)?;
        let mut chars = rest.chars();
        let first = chars.next()?;
        Some(first.to_lowercase().chain(chars).collect())
    }
}

impl ForeignObject for FakeObject {
    fn class_name(&self) -> String {
        self.class_name.clone()
    }

    fn interfaces(&self) -> Vec<String> {
        self.interfaces.clone()
    }

    fn members(&self) -> Vec<MemberInfo> {
        let mut members: Vec<MemberInfo> = self
            .methods
            .iter()
            .map(|(name, (arity, _))| MemberInfo::method(name.clone(), *arity))
            .collect();
        members.extend(self.fields.lock().unwrap().keys().map(MemberInfo::field));
        members
    }

    fn invoke(&self, name: &str, args: &[ForeignValue]) -> std::result::Result<ForeignValue, ForeignError> {
        self.calls.lock().unwrap().push(name.to_string());

        if let Some((_, method)) = self.methods.get(name) {
            return method(self, args);
        }

        if args.is_empty() {
            if let Some(field) = Self::accessor_field("get", name) {
                if let Some(value) = self.fields.lock().unwrap().get(&field) {
                    return Ok(value.clone());
                }
            }
        } else if args.len() == 1 {
            if let Some(field) = Self::accessor_field("set", name) {
                let mut fields = self.fields.lock().unwrap();
                if fields.contains_key(&field) {
                    fields.insert(field, args[0].clone());
                    return Ok(ForeignValue::Null);
                }
            }
        }

        Err(ForeignError::no_such_member(&self.class_name, name))
    }

    fn get_field(&self, name: &str) -> std::result::Result<ForeignValue, ForeignError> {
        self.fields
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ForeignError::no_such_member(&self.class_name, name))
    }

    fn set_field(&self, name: &str, value: ForeignValue) -> std::result::Result<(), ForeignError> {
        let mut fields = self.fields.lock().unwrap();
        match fields.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ForeignError::no_such_member(&self.class_name, name)),
        }
    }
}

pub struct FakeClass {
    name: String,
    constructor: Option<CtorImpl>,
    statics: BTreeMap<String, StaticImpl>,
}

impl FakeClass {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            constructor: None,
            statics: BTreeMap::new(),
        }
    }

    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn(&[ForeignValue]) -> std::result::Result<ForeignRef, ForeignError> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(f));
        self
    }

    pub fn static_method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[ForeignValue]) -> std::result::Result<ForeignValue, ForeignError> + Send + Sync + 'static,
    {
        self.statics.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn into_ref(self) -> ClassRef {
        Arc::new(self)
    }
}

impl ForeignClass for FakeClass {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn construct(&self, args: &[ForeignValue]) -> std::result::Result<ForeignRef, ForeignError> {
        match &self.constructor {
            Some(ctor) => ctor(args),
            None => Err(ForeignError::no_such_member(&self.name, "<init>")),
        }
    }

    fn invoke_static(&self, name: &str, args: &[ForeignValue]) -> std::result::Result<ForeignValue, ForeignError> {
        match self.statics.get(name) {
            Some(f) => f(args),
            None => Err(ForeignError::no_such_member(&self.name, name)),
        }
    }
}

pub struct FakeScope {
    classes: BTreeMap<String, ClassRef>,
    closed: Arc<AtomicBool>,
}

impl FakeScope {
    pub fn with_classes(classes: Vec<ClassRef>) -> Self {
        Self {
            classes: classes.into_iter().map(|c| (c.name(), c)).collect(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl LoaderScope for FakeScope {
    fn load_class(&self, fqcn: &str) -> std::result::Result<ClassRef, ForeignError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ForeignError::ScopeClosed);
        }
        self.classes
            .get(fqcn)
            .cloned()
            .ok_or_else(|| ForeignError::ClassNotFound(fqcn.to_string()))
    }

    fn close(&self) -> std::result::Result<(), ForeignError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub type ClassProvider = Arc<dyn Fn(&Path) -> Vec<ClassRef> + Send + Sync>;

/// Host whose scopes expose the classes returned by a provider, plus the model classes
pub struct FakeHost {
    provider: ClassProvider,
    opened: Mutex<Vec<(PathBuf, Arc<AtomicBool>)>>,
}

impl FakeHost {
    pub fn new<F>(provider: F) -> Arc<Self>
    where
        F: Fn(&Path) -> Vec<ClassRef> + Send + Sync + 'static,
    {
        Arc::new(Self {
            provider: Arc::new(provider),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opened_modules(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn closed_count(&self) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, closed)| closed.load(Ordering::SeqCst))
            .count()
    }
}

impl ClassLoaderHost for FakeHost {
    fn open_scope(&self, module_path: &Path, _work_dir: &Path) -> std::result::Result<Arc<dyn LoaderScope>, ForeignError> {
        let mut classes: BTreeMap<String, ClassRef> = model_classes()
            .into_iter()
            .map(|c| (c.name(), c))
            .collect();
        for class in (self.provider)(module_path) {
            classes.insert(class.name(), class);
        }

        let closed = Arc::new(AtomicBool::new(false));
        self.opened
            .lock()
            .unwrap()
            .push((module_path.to_path_buf(), closed.clone()));

        Ok(Arc::new(FakeScope { classes, closed }))
    }
}

/// Model classes every extension links against
pub fn model_classes() -> Vec<ClassRef> {
    vec![
        FakeClass::new(SMANGA_CLASS)
            .static_method("create", |_| Ok(ForeignValue::Object(blank_manga())))
            .into_ref(),
        FakeClass::new(SCHAPTER_CLASS)
            .static_method("create", |_| Ok(ForeignValue::Object(blank_chapter())))
            .into_ref(),
        FakeClass::new(FILTER_LIST_CLASS)
            .constructor(|args| {
                let list = args.first().cloned().unwrap_or(ForeignValue::List(vec![]));
                Ok(FakeObject::builder(FILTER_LIST_CLASS).field("list", list).build() as ForeignRef)
            })
            .into_ref(),
    ]
}

pub fn blank_manga() -> ForeignRef {
    FakeObject::builder("eu.kanade.tachiyomi.source.model.SMangaImpl")
        .field("url", "")
        .field("title", "")
        .null_field("artist")
        .null_field("author")
        .null_field("description")
        .null_field("genre")
        .field("status", 0)
        .null_field("thumbnail_url")
        .field("initialized", false)
        .build()
}

pub fn blank_chapter() -> ForeignRef {
    FakeObject::builder("eu.kanade.tachiyomi.source.model.SChapterImpl")
        .field("url", "")
        .field("name", "")
        .field("date_upload", 0i64)
        .field("chapter_number", -1.0f32)
        .null_field("scanlator")
        .build()
}

pub fn foreign_manga(url: &str, title: &str) -> ForeignValue {
    let manga = blank_manga();
    manga.set_field("url", url.into()).unwrap();
    manga.set_field("title", title.into()).unwrap();
    ForeignValue::Object(manga)
}

pub fn mangas_page(mangas: Vec<ForeignValue>, has_next_page: bool) -> ForeignValue {
    ForeignValue::Object(
        FakeObject::builder("eu.kanade.tachiyomi.source.model.MangasPage")
            .field("mangas", ForeignValue::List(mangas))
            .field("hasNextPage", has_next_page)
            .build(),
    )
}

/// Catalogue source answering `getPopularManga` with one titled entry per page
pub fn fake_source(id: i64, name: &str, lang: &str) -> FakeObjectBuilder {
    let source_name = name.to_string();
    FakeObject::builder(&format!("eu.kanade.tachiyomi.extension.{}.{}", lang, name.replace(' ', "")))
        .interface(CATALOGUE_SOURCE_IFACE)
        .interface("eu.kanade.tachiyomi.source.Source")
        .field("id", id)
        .field("name", name)
        .field("lang", lang)
        .field("supportsLatest", true)
        .method("getPopularManga", 1, move |_, args| {
            let page = args.first().and_then(ForeignValue::as_i32).unwrap_or(0);
            Ok(mangas_page(
                vec![foreign_manga(&format!("/popular/{}", page), &format!("{} popular {}", source_name, page))],
                page < 3,
            ))
        })
}

/// Class whose zero-argument constructor yields the given source
pub fn source_class<F>(fqcn: &str, make: F) -> ClassRef
where
    F: Fn() -> Arc<FakeObject> + Send + Sync + 'static,
{
    FakeClass::new(fqcn)
        .constructor(move |args| {
            if !args.is_empty() {
                return Err(ForeignError::no_such_member("source", "<init>"));
            }
            Ok(make() as ForeignRef)
        })
        .into_ref()
}

/// Class implementing `SourceFactory` over freshly built sources
pub fn factory_class(fqcn: &str, sources: Vec<(i64, &'static str, &'static str)>) -> ClassRef {
    let class_name = fqcn.to_string();
    FakeClass::new(fqcn)
        .constructor(move |_| {
            let sources = sources.clone();
            Ok(FakeObject::builder(&class_name)
                .interface(SOURCE_FACTORY_IFACE)
                .method("createSources", 0, move |_, _| {
                    Ok(ForeignValue::List(
                        sources
                            .iter()
                            .map(|(id, name, lang)| ForeignValue::Object(fake_source(*id, name, lang).build()))
                            .collect(),
                    ))
                })
                .build() as ForeignRef)
        })
        .into_ref()
}

// ---------------------------------------------------------------------------
// Converter fake
// ---------------------------------------------------------------------------

/// Converter writing a small jar; optionally fails like a missing `d2j-dex2jar`
#[derive(Default)]
pub struct FakeConverter {
    pub fail: bool,
    pub calls: AtomicUsize,
    pub seen_inputs: Mutex<Vec<(PathBuf, bool)>>,
}

impl FakeConverter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl BytecodeConverter for FakeConverter {
    async fn convert(&self, dex_path: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_inputs
            .lock()
            .unwrap()
            .push((dex_path.to_path_buf(), dex_path.exists()));

        if self.fail {
            return Err(BridgeError::Conversion("dex2jar converter not found".to_string()));
        }

        let file = std::fs::File::create(output)?;
        let mut jar = zip::ZipWriter::new(file);
        jar.start_file("META-INF/MANIFEST.MF", SimpleFileOptions::default())?;
        jar.write_all(b"Manifest-Version: 1.0\n")?;
        jar.start_file("eu/kanade/Example.class", SimpleFileOptions::default())?;
        jar.write_all(b"\xca\xfe\xba\xbe")?;
        jar.finish()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Canned responses keyed by URL; anything else is a connection error
#[derive(Default)]
pub struct FakeHttp {
    pub pages: HashMap<String, (u16, String)>,
    pub files: HashMap<String, Vec<u8>>,
    pub hang_downloads: bool,
}

impl FakeHttp {
    pub fn page(mut self, url: &str, status: u16, body: &str) -> Self {
        self.pages.insert(url.to_string(), (status, body.to_string()));
        self
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        match self.pages.get(url) {
            Some((status, body)) => Ok(HttpResponse {
                status: *status,
                body: body.clone(),
            }),
            None => Err(BridgeError::Network(format!("connection refused: {}", url))),
        }
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        if self.hang_downloads {
            std::future::pending::<()>().await;
        }
        self.files
            .get(url)
            .map(|bytes| Bytes::from(bytes.clone()))
            .ok_or_else(|| BridgeError::Network(format!("HTTP 404: {}", url)))
    }
}
