//! Comps (package groups) reader/writer: groups, categories, environments, langpacks.

use crate::errors::*;
use crate::utils::natural_cmp;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::io::{Read, Write};

const DOCTYPE: &str = " comps PUBLIC \"-//CentOS//DTD Comps info//EN\" \"comps.dtd\"";

/// A string that may be localized: a default value plus a language-indexed map of
/// alternates. A `LocString` with no default and no alternates reads as an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocString {
    pub default: String,
    pub localized: BTreeMap<String, String>,
}

impl LocString {
    pub fn get(&self, lang: Option<&str>) -> &str {
        match lang {
            Some(lang) => self.localized.get(lang).unwrap_or(&self.default),
            None => &self.default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    Mandatory,
    Default,
    Optional,
    Conditional,
}

impl PackageType {
    fn priority(self) -> u8 {
        match self {
            PackageType::Mandatory => 0,
            PackageType::Default => 1,
            PackageType::Optional => 2,
            PackageType::Conditional => 3,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            PackageType::Mandatory => "mandatory",
            PackageType::Default => "default",
            PackageType::Optional => "optional",
            PackageType::Conditional => "conditional",
        }
    }
}

impl std::str::FromStr for PackageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mandatory" => Ok(PackageType::Mandatory),
            "default" => Ok(PackageType::Default),
            "optional" => Ok(PackageType::Optional),
            "conditional" => Ok(PackageType::Conditional),
            other => Err(Error::InvalidOptions(format!("unknown package type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPackage {
    pub name: String,
    pub package_type: PackageType,
    pub basearchonly: bool,
    pub arch: Vec<String>,
    pub requires: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub name: LocString,
    pub description: LocString,
    pub default: bool,
    pub uservisible: bool,
    pub packages: Vec<GroupPackage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: LocString,
    pub description: LocString,
    pub group_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub id: String,
    pub name: LocString,
    pub description: LocString,
    pub display_order: Option<i64>,
    pub group_ids: Vec<String>,
    pub option_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Langpack {
    pub name: String,
    pub install: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comps {
    pub groups: Vec<Group>,
    pub categories: Vec<Category>,
    pub environments: Vec<Environment>,
    pub langpacks: Vec<Langpack>,
}

impl Comps {
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut comps = Comps::default();

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"group" => comps.groups.push(read_group(&mut reader)?),
                    b"category" => comps.categories.push(read_category(&mut reader)?),
                    b"environment" => comps.environments.push(read_environment(&mut reader)?),
                    b"langpacks" => comps.langpacks = read_langpacks(&mut reader)?,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(comps)
    }

    /// Reads a comps document, transparently gunzipping it if it's gzip-compressed.
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        let text = if raw.starts_with(&[0x1F, 0x8B]) {
            let mut decoder = flate2::read::GzDecoder::new(&raw[..]);
            let mut s = String::new();
            decoder.read_to_string(&mut s)?;
            s
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };
        Self::from_xml(&text)
    }

    /// Serializes in deterministic order: groups by id (natural sort), packages within
    /// a group by type priority then name (natural sort), categories by id, environments
    /// by id, langpacks by name; ids/languages sorted lexicographically throughout.
    pub fn to_xml(&self) -> Result<String> {
        let mut groups = self.groups.clone();
        groups.sort_by(|a, b| natural_cmp(&a.id, &b.id));
        for g in &mut groups {
            g.packages.sort_by(|a, b| {
                a.package_type
                    .priority()
                    .cmp(&b.package_type.priority())
                    .then_with(|| natural_cmp(&a.name, &b.name))
            });
        }
        let mut categories = self.categories.clone();
        categories.sort_by(|a, b| natural_cmp(&a.id, &b.id));
        let mut environments = self.environments.clone();
        environments.sort_by(|a, b| natural_cmp(&a.id, &b.id));
        let mut langpacks = self.langpacks.clone();
        langpacks.sort_by(|a, b| natural_cmp(&a.name, &b.name));

        let mut buf = Vec::new();
        buf.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        buf.extend_from_slice(format!("<!DOCTYPE{DOCTYPE}>\n").as_bytes());

        let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);
        writer
            .create_element("comps")
            .write_inner_content::<_, Error>(|w| {
                for g in &groups {
                    write_group(w, g)?;
                }
                for c in &categories {
                    write_category(w, c)?;
                }
                for e in &environments {
                    write_environment(w, e)?;
                }
                if !langpacks.is_empty() {
                    write_langpacks(w, &langpacks)?;
                }
                Ok(())
            })?;
        buf.push(b'\n');

        Ok(String::from_utf8(buf).expect("quick-xml only emits valid utf-8"))
    }
}

fn read_loc_string(reader: &mut Reader<&[u8]>, start: &BytesStart, end_tag: &[u8]) -> Result<(String, String)> {
    let lang = start
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == b"xml:lang")
        .map(|a| a.unescape_value().unwrap_or_default().into_owned())
        .unwrap_or_default();
    let text = read_text_until(reader, end_tag)?;
    Ok((lang, text))
}

fn read_text_until(reader: &mut Reader<&[u8]>, end_tag: &[u8]) -> Result<String> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t.into_inner())),
            Event::End(e) if e.name().as_ref() == end_tag => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(text)
}

fn attr(start: &BytesStart, name: &[u8]) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| a.unescape_value().unwrap_or_default().into_owned())
}

fn read_group(reader: &mut Reader<&[u8]>) -> Result<Group> {
    let mut group = Group::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"id" => group.id = read_text_until(reader, b"id")?,
                b"name" => {
                    let (lang, text) = read_loc_string(reader, &e, b"name")?;
                    set_loc(&mut group.name, &lang, text);
                }
                b"description" => {
                    let (lang, text) = read_loc_string(reader, &e, b"description")?;
                    set_loc(&mut group.description, &lang, text);
                }
                b"default" => group.default = read_text_until(reader, b"default")? == "true",
                b"uservisible" => group.uservisible = read_text_until(reader, b"uservisible")? == "true",
                b"packagelist" => group.packages = read_packagelist(reader)?,
                other => {
                    skip_element(reader, other)?;
                }
            },
            Event::End(e) if e.name().as_ref() == b"group" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(group)
}

fn read_packagelist(reader: &mut Reader<&[u8]>) -> Result<Vec<GroupPackage>> {
    let mut packages = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"packagereq" => {
                let package_type = attr(&e, b"type")
                    .map(|s| s.parse())
                    .transpose()?
                    .unwrap_or(PackageType::Default);
                let basearchonly = attr(&e, b"basearchonly").as_deref() == Some("true");
                let arch = attr(&e, b"arch")
                    .map(|s| s.split(',').map(|s| s.to_string()).collect())
                    .unwrap_or_default();
                let requires = attr(&e, b"requires");
                let name = read_text_until(reader, b"packagereq")?;
                packages.push(GroupPackage { name, package_type, basearchonly, arch, requires });
            }
            Event::End(e) if e.name().as_ref() == b"packagelist" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(packages)
}

fn read_category(reader: &mut Reader<&[u8]>) -> Result<Category> {
    let mut category = Category::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"id" => category.id = read_text_until(reader, b"id")?,
                b"name" => {
                    let (lang, text) = read_loc_string(reader, &e, b"name")?;
                    set_loc(&mut category.name, &lang, text);
                }
                b"description" => {
                    let (lang, text) = read_loc_string(reader, &e, b"description")?;
                    set_loc(&mut category.description, &lang, text);
                }
                b"grouplist" => category.group_ids = read_id_list(reader, b"grouplist", b"groupid")?,
                other => {
                    skip_element(reader, other)?;
                }
            },
            Event::End(e) if e.name().as_ref() == b"category" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(category)
}

fn read_environment(reader: &mut Reader<&[u8]>) -> Result<Environment> {
    let mut env = Environment::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"id" => env.id = read_text_until(reader, b"id")?,
                b"name" => {
                    let (lang, text) = read_loc_string(reader, &e, b"name")?;
                    set_loc(&mut env.name, &lang, text);
                }
                b"description" => {
                    let (lang, text) = read_loc_string(reader, &e, b"description")?;
                    set_loc(&mut env.description, &lang, text);
                }
                b"display_order" => {
                    let text = read_text_until(reader, b"display_order")?;
                    env.display_order = text.parse().ok();
                }
                b"grouplist" => env.group_ids = read_id_list(reader, b"grouplist", b"groupid")?,
                b"optionlist" => env.option_ids = read_id_list(reader, b"optionlist", b"groupid")?,
                other => {
                    skip_element(reader, other)?;
                }
            },
            Event::End(e) if e.name().as_ref() == b"environment" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(env)
}

fn read_id_list(reader: &mut Reader<&[u8]>, end_tag: &[u8], item_tag: &[u8]) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == item_tag => {
                ids.push(read_text_until(reader, item_tag)?);
            }
            Event::End(e) if e.name().as_ref() == end_tag => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ids)
}

fn read_langpacks(reader: &mut Reader<&[u8]>) -> Result<Vec<Langpack>> {
    let mut langpacks = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"match" => {
                let name = attr(&e, b"name").unwrap_or_default();
                let install = attr(&e, b"install").unwrap_or_default();
                langpacks.push(Langpack { name, install });
            }
            Event::End(e) if e.name().as_ref() == b"langpacks" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(langpacks)
}

fn skip_element(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<()> {
    let name = name.to_vec();
    loop {
        match reader.read_event()? {
            Event::End(e) if e.name().as_ref() == name => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn set_loc(loc: &mut LocString, lang: &str, text: String) {
    if lang.is_empty() {
        loc.default = text;
    } else {
        loc.localized.insert(lang.to_string(), text);
    }
}

fn write_loc_string<W: Write>(writer: &mut Writer<W>, tag: &str, loc: &LocString) -> Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(&loc.default))?;
    for (lang, text) in &loc.localized {
        writer
            .create_element(tag)
            .with_attribute(("xml:lang", lang.as_str()))
            .write_text_content(BytesText::new(text))?;
    }
    Ok(())
}

fn write_group<W: Write>(writer: &mut Writer<W>, group: &Group) -> Result<()> {
    writer
        .create_element("group")
        .write_inner_content::<_, Error>(|w| {
            w.create_element("id").write_text_content(BytesText::new(&group.id))?;
            write_loc_string(w, "name", &group.name)?;
            write_loc_string(w, "description", &group.description)?;
            w.create_element("default")
                .write_text_content(BytesText::new(if group.default { "true" } else { "false" }))?;
            w.create_element("uservisible")
                .write_text_content(BytesText::new(if group.uservisible { "true" } else { "false" }))?;
            w.create_element("packagelist")
                .write_inner_content::<_, Error>(|w| {
                    for pkg in &group.packages {
                        let mut elem = w.create_element("packagereq").with_attribute(("type", pkg.package_type.as_str()));
                        if pkg.basearchonly {
                            elem = elem.with_attribute(("basearchonly", "true"));
                        }
                        if !pkg.arch.is_empty() {
                            let joined = pkg.arch.join(",");
                            elem = elem.with_attribute(("arch", joined.as_str()));
                        }
                        if let Some(requires) = &pkg.requires {
                            elem = elem.with_attribute(("requires", requires.as_str()));
                        }
                        elem.write_text_content(BytesText::new(&pkg.name))?;
                    }
                    Ok(())
                })?;
            Ok(())
        })?;
    Ok(())
}

fn write_category<W: Write>(writer: &mut Writer<W>, category: &Category) -> Result<()> {
    writer
        .create_element("category")
        .write_inner_content::<_, Error>(|w| {
            w.create_element("id").write_text_content(BytesText::new(&category.id))?;
            write_loc_string(w, "name", &category.name)?;
            write_loc_string(w, "description", &category.description)?;
            if !category.group_ids.is_empty() {
                let mut group_ids = category.group_ids.clone();
                group_ids.sort();
                w.create_element("grouplist").write_inner_content::<_, Error>(|w| {
                    for id in &group_ids {
                        w.create_element("groupid").write_text_content(BytesText::new(id))?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })?;
    Ok(())
}

fn write_environment<W: Write>(writer: &mut Writer<W>, env: &Environment) -> Result<()> {
    writer
        .create_element("environment")
        .write_inner_content::<_, Error>(|w| {
            w.create_element("id").write_text_content(BytesText::new(&env.id))?;
            write_loc_string(w, "name", &env.name)?;
            write_loc_string(w, "description", &env.description)?;
            if let Some(order) = env.display_order {
                w.create_element("display_order")
                    .write_text_content(BytesText::new(&order.to_string()))?;
            }
            if !env.group_ids.is_empty() {
                let mut group_ids = env.group_ids.clone();
                group_ids.sort();
                w.create_element("grouplist").write_inner_content::<_, Error>(|w| {
                    for id in &group_ids {
                        w.create_element("groupid").write_text_content(BytesText::new(id))?;
                    }
                    Ok(())
                })?;
            }
            if !env.option_ids.is_empty() {
                let mut option_ids = env.option_ids.clone();
                option_ids.sort();
                w.create_element("optionlist").write_inner_content::<_, Error>(|w| {
                    for id in &option_ids {
                        w.create_element("groupid").write_text_content(BytesText::new(id))?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })?;
    Ok(())
}

fn write_langpacks<W: Write>(writer: &mut Writer<W>, langpacks: &[Langpack]) -> Result<()> {
    writer
        .create_element("langpacks")
        .write_inner_content::<_, Error>(|w| {
            for lp in langpacks {
                w.create_element("match")
                    .with_attribute(("name", lp.name.as_str()))
                    .with_attribute(("install", lp.install.as_str()))
                    .write_empty()?;
            }
            Ok(())
        })?;
    Ok(())
}
