//! XML config files: event trees, filter banks, devices and the main settings.
//!
//! Every file has a `<config scope="…">` root. Objects are stored as elements
//! whose attributes are the object's [`ConfigFields`]. Reading is lenient: an
//! item that cannot be rebuilt is logged and skipped, the rest of the file is
//! kept.

use crate::bus::EventBus;
use crate::config::{apply_config, parse_error, ConfigFields, CoreContext, CoreSettings};
use crate::devices::{DeviceEntry, DeviceKind, DeviceProperty};
use crate::error::Result;
use crate::events::event::Event;
use crate::events::tree::{EventNode, EventTree};
use crate::filters::bank::{FilterEntry, SharedBank};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::{Reader, Writer};
use std::path::PathBuf;
use std::time::Duration;

pub const SCOPE_EVENTS: &str = "events";
pub const SCOPE_FILTERS: &str = "filters";
pub const SCOPE_DEVICES: &str = "devices";
pub const SCOPE_MAIN: &str = "terapy";

/// A parsed XML element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: &str) -> XmlElement {
        XmlElement {
            name: name.to_string(),
            ..XmlElement::default()
        }
    }

    pub fn attr(mut self, key: &str, value: impl ToString) -> XmlElement {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => v.trim().eq_ignore_ascii_case("true") || v.trim() == "1",
            None => default,
        }
    }

    /// Attributes other than `reserved`.
    fn config_pairs(&self, reserved: &[&str]) -> Vec<(String, String)> {
        self.attributes
            .iter()
            .filter(|(k, _)| !reserved.contains(&k.as_str()))
            .cloned()
            .collect()
    }
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, element: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() && element.text.is_empty() {
        writer.write_event(XmlEvent::Empty(start))?;
        return Ok(());
    }
    writer.write_event(XmlEvent::Start(start))?;
    if !element.text.is_empty() {
        writer.write_event(XmlEvent::Text(BytesText::new(&element.text)))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer.write_event(XmlEvent::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

/// Serializes `root` as an indented document.
pub fn to_string(root: &XmlElement) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_element(&mut writer, root)?;
    String::from_utf8(writer.into_inner()).map_err(|e| parse_error(e.to_string()))
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement> {
    let mut element = XmlElement::new(&String::from_utf8_lossy(start.name().as_ref()));
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

/// Parses a document into its root element.
pub fn parse_document(text: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<XmlElement> = Vec::new();
    loop {
        let finished = match reader.read_event()? {
            XmlEvent::Start(start) => {
                stack.push(element_from(&start)?);
                None
            }
            XmlEvent::Empty(start) => Some(element_from(&start)?),
            XmlEvent::Text(text) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&text.unescape()?);
                }
                None
            }
            XmlEvent::End(_) => stack.pop(),
            XmlEvent::Eof => return Err(parse_error("unexpected end of document")),
            _ => None,
        };
        if let Some(element) = finished {
            match stack.last_mut() {
                Some(parent) => parent.children.push(element),
                None => return Ok(element),
            }
        }
    }
}

fn config_root(scope: &str) -> XmlElement {
    XmlElement::new("config").attr("scope", scope)
}

/// Parses `text` and checks that it is a config of the given scope.
fn parse_config(text: &str, scope: &str) -> Result<XmlElement> {
    let root = parse_document(text)?;
    if root.name != "config" || root.get("scope") != Some(scope) {
        return Err(parse_error(format!(
            "expected <config scope=\"{scope}\">, found <{} scope=\"{}\">",
            root.name,
            root.get("scope").unwrap_or_default()
        )));
    }
    Ok(root)
}

const EVENT_RESERVED: [&str; 4] = ["class", "name", "active", "expanded"];

fn event_element(tag: &str, node: &EventNode) -> XmlElement {
    let event = &node.event;
    let mut element = XmlElement::new(tag);
    if tag == "item" {
        element = element.attr("class", event.class());
    }
    element = element
        .attr("name", &event.name)
        .attr("active", event.is_active)
        .attr("expanded", node.expanded);
    for (key, value) in event.kind.config_values() {
        element = element.attr(key, value);
    }
    element.children = node.children.iter().map(|c| event_element("item", c)).collect();
    element
}

fn event_children(element: &XmlElement) -> Vec<EventNode> {
    element
        .children
        .iter()
        .filter(|c| c.name == "item")
        .filter_map(|item| match event_node(item) {
            Ok(node) => Some(node),
            Err(err) => {
                log::warn!("skipping event item: {err}");
                None
            }
        })
        .collect()
}

fn event_node(element: &XmlElement) -> Result<EventNode> {
    let class = element.get("class").unwrap_or("Sequence");
    let mut event = Event::from_class(class).ok_or_else(|| parse_error(format!("unknown event class {class}")))?;
    if let Some(name) = element.get("name") {
        event.name = name.to_string();
    }
    event.is_active = element.flag("active", true);
    apply_config(&mut event.kind, &element.config_pairs(&EVENT_RESERVED));
    if event.kind.is_root() && element.name == "item" {
        return Err(parse_error(format!("{} cannot be nested", event.name)));
    }
    let mut node = EventNode::new(event);
    node.expanded = element.flag("expanded", true);
    node.children = event_children(element);
    Ok(node)
}

/// `<config scope="events">` with one `<events>` element per sequence.
pub fn events_to_xml(roots: &[EventNode]) -> Result<String> {
    let mut root = config_root(SCOPE_EVENTS);
    root.children = roots
        .iter()
        .filter(|r| r.event.kind.is_root())
        .map(|r| event_element("events", r))
        .collect();
    to_string(&root)
}

pub fn events_from_xml(text: &str) -> Result<EventTree> {
    let root = parse_config(text, SCOPE_EVENTS)?;
    let roots = root
        .children
        .iter()
        .filter(|c| c.name == "events")
        .filter_map(|element| match event_node(element) {
            Ok(node) => Some(node),
            Err(err) => {
                log::warn!("skipping sequence: {err}");
                None
            }
        })
        .collect();
    Ok(EventTree { roots })
}

const FILTER_RESERVED: [&str; 4] = ["class", "name", "active", "visible"];

/// `<config scope="filters">` with one `<filters>` element per bank.
pub fn filters_to_xml(banks: &[SharedBank]) -> Result<String> {
    let mut root = config_root(SCOPE_FILTERS);
    for bank in banks {
        let bank = bank.read();
        let mut element = XmlElement::new("filters")
            .attr("name", &bank.name)
            .attr("dimension", bank.dimension);
        for entry in bank.filters() {
            let mut item = XmlElement::new("item")
                .attr("class", entry.filter.class_name())
                .attr("name", entry.filter.config().name)
                .attr("active", entry.active)
                .attr("visible", entry.visible);
            for (key, value) in entry.filter.config_values() {
                item = item.attr(key, value);
            }
            element.children.push(item);
        }
        root.children.push(element);
    }
    to_string(&root)
}

/// Rebuilds filter banks with filters from the registry of `core`.
///
/// Unknown classes and filters breaking the ordering rules are skipped.
pub fn filters_from_xml(text: &str, core: &CoreContext, bus: &EventBus) -> Result<Vec<SharedBank>> {
    let root = parse_config(text, SCOPE_FILTERS)?;
    let mut banks = Vec::new();
    for element in root.children.iter().filter(|c| c.name == "filters") {
        let name = element.get("name").unwrap_or("filters");
        let dimension = element.get("dimension").and_then(|d| d.trim().parse().ok()).unwrap_or(1);
        let bank = SharedBank::new(name, dimension, bus.clone());
        for item in element.children.iter().filter(|c| c.name == "item") {
            let class = item.get("class").unwrap_or_default();
            let Some(mut filter) = core.create_filter(class) else {
                log::warn!("skipping filter item: unknown filter class \"{class}\"");
                continue;
            };
            apply_config(filter.as_mut(), &item.config_pairs(&FILTER_RESERVED));
            let mut entry = FilterEntry::new(filter);
            entry.active = item.flag("active", true);
            entry.visible = item.flag("visible", true);
            let position = bank.read().len();
            if let Err(err) = bank.insert_entry(position, entry) {
                log::warn!("skipping filter {class} in {name}: {err}");
            }
        }
        banks.push(bank);
    }
    Ok(banks)
}

fn device_element(entry: &DeviceEntry) -> XmlElement {
    let mut element = XmlElement::new(entry.kind.tag())
        .attr("handle", &entry.handle)
        .attr("driver", &entry.driver)
        .attr("name", &entry.name)
        .attr("axis", &entry.axis);
    for (key, value) in &entry.properties {
        element.children.push(XmlElement::new("property").attr(key, value));
    }
    if !entry.snapshot.is_empty() {
        let mut snapshot = XmlElement::new("snapshot");
        for p in &entry.snapshot {
            snapshot.children.push(
                XmlElement::new("value")
                    .attr("name", &p.name)
                    .attr("value", &p.value)
                    .attr("units", &p.units),
            );
        }
        element.children.push(snapshot);
    }
    element
}

/// `<config scope="devices">` with an `<input>` or `<axis>` element per device.
pub fn devices_to_xml(entries: &[DeviceEntry]) -> Result<String> {
    let mut root = config_root(SCOPE_DEVICES);
    root.children = entries.iter().map(device_element).collect();
    to_string(&root)
}

pub fn devices_from_xml(text: &str) -> Result<Vec<DeviceEntry>> {
    let root = parse_config(text, SCOPE_DEVICES)?;
    let mut entries = Vec::new();
    for element in &root.children {
        let kind = match element.name.as_str() {
            "input" => DeviceKind::Input,
            "axis" => DeviceKind::Axis,
            other => {
                log::warn!("skipping unknown device element <{other}>");
                continue;
            }
        };
        let Some(name) = element.get("name").or(element.get("handle")) else {
            log::warn!("skipping {} without a name", kind.tag());
            continue;
        };
        let properties = element
            .children
            .iter()
            .filter(|c| c.name == "property")
            .flat_map(|c| c.attributes.iter().cloned())
            .collect();
        let snapshot = element
            .children
            .iter()
            .filter(|c| c.name == "snapshot")
            .flat_map(|c| c.children.iter())
            .filter(|v| v.name == "value")
            .map(|v| DeviceProperty {
                name: v.get("name").unwrap_or_default().to_string(),
                value: v.get("value").unwrap_or_default().to_string(),
                units: v.get("units").unwrap_or_default().to_string(),
            })
            .collect();
        entries.push(DeviceEntry {
            kind,
            handle: element.get("handle").unwrap_or(name).to_string(),
            driver: element.get("driver").unwrap_or_default().to_string(),
            name: name.to_string(),
            axis: element.get("axis").unwrap_or_default().to_string(),
            properties,
            snapshot,
        });
    }
    Ok(entries)
}

fn path_element(name: &str, path: &std::path::Path) -> XmlElement {
    XmlElement {
        text: path.display().to_string(),
        ..XmlElement::new(name)
    }
}

/// The main `<config scope="terapy">` file.
pub fn settings_to_xml(settings: &CoreSettings) -> Result<String> {
    let mut root = config_root(SCOPE_MAIN);
    root.children = vec![
        path_element("default_path", &settings.default_path),
        path_element("user_path", &settings.user_path),
        path_element("config_path", &settings.config_path),
        path_element("filter_path", &settings.filter_path),
        path_element("module_path", &settings.module_path),
        XmlElement {
            text: settings.refresh_delay.as_millis().to_string(),
            ..XmlElement::new("refresh_delay")
        },
    ];
    for (kind, symbol) in &settings.units {
        root.children
            .push(XmlElement::new("units").attr("type", kind).attr("symbol", symbol));
    }
    to_string(&root)
}

/// Reads the main config on top of [`CoreSettings::default`].
pub fn settings_from_xml(text: &str) -> Result<CoreSettings> {
    let root = parse_config(text, SCOPE_MAIN)?;
    let mut settings = CoreSettings::default();
    for element in &root.children {
        let value = element.text.trim();
        match element.name.as_str() {
            "default_path" => settings.default_path = PathBuf::from(value),
            "user_path" => settings.user_path = PathBuf::from(value),
            "config_path" => settings.config_path = PathBuf::from(value),
            "filter_path" => settings.filter_path = PathBuf::from(value),
            "module_path" => settings.module_path = PathBuf::from(value),
            "refresh_delay" => match value.parse::<u64>() {
                Ok(ms) => settings.refresh_delay = Duration::from_millis(ms),
                Err(_) => log::warn!("ignoring refresh_delay \"{value}\""),
            },
            "units" => match (element.get("type"), element.get("symbol")) {
                (Some(kind), Some(symbol)) => settings.units.push((kind.to_string(), symbol.to_string())),
                _ => log::warn!("ignoring <units> without type and symbol"),
            },
            other => log::warn!("ignoring unknown setting <{other}>"),
        }
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::crop::Crop;
    use crate::filters::filter::Filter;
    use crate::filters::fourier::FourierTransform;

    fn node(class: &str, attrs: &[(&str, &str)]) -> EventNode {
        let mut event = Event::from_class(class).unwrap();
        for (name, value) in attrs {
            event = event.with(name, value).unwrap();
        }
        EventNode::new(event)
    }

    #[test]
    fn event_tree_round_trip_keeps_structure_and_config() {
        let mut scan = node("Scan_ZZ", &[("axis", "B"), ("min", "-1.5"), ("max", "4"), ("n", "5")]);
        scan.expanded = false;
        let mut wait = node("Wait", &[("ms", "20")]);
        wait.event.is_active = false;
        let sequence = node("Sequence", &[])
            .with_child(
                scan.with_child(node("Read_Avg", &[("input", "I"), ("samples", "3")]))
                    .with_child(wait),
            )
            .with_child(node("Scan_List", &[("axis", "A"), ("positions", "0.5, 1, 2")]))
            .with_child(node("Save", &[("file", "out & back.csv")]));
        let xml = events_to_xml(std::slice::from_ref(&sequence)).unwrap();
        let tree = events_from_xml(&xml).unwrap();
        assert_eq!(tree.roots.len(), 1);
        assert!(tree.roots[0].same_structure(&sequence), "{xml}");
    }

    #[test]
    fn bad_event_items_are_skipped() {
        let xml = r#"<config scope="events">
            <events name="seq">
                <item class="Teleport" name="x"/>
                <item class="Wait" name="pause" ms="not a number"/>
                <item class="Read" name="read" input="I"/>
            </events>
        </config>"#;
        let tree = events_from_xml(xml).unwrap();
        let children = &tree.roots[0].children;
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].event.name, "pause");
        assert_eq!(children[0].event.kind.get_config("ms").as_deref(), Some("1000"));
        assert!(events_from_xml(r#"<config scope="filters"/>"#).is_err());
    }

    #[test]
    fn filter_bank_round_trip() {
        let core = CoreContext::default();
        let bus = EventBus::default();
        let bank = SharedBank::new("transmission", 1, bus.clone());
        bank.append(Box::new(Crop { min: 1.0, max: 20.0 })).unwrap();
        bank.append(Box::new(FourierTransform::new())).unwrap();
        bank.set_active(1, false);

        let xml = filters_to_xml(std::slice::from_ref(&bank)).unwrap();
        let banks = filters_from_xml(&xml, &core, &bus).unwrap();
        let loaded = banks[0].read();
        assert_eq!(loaded.name, "transmission");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.filters()[0].filter.get_config("max").as_deref(), Some("20"));
        assert!(!loaded.filters()[1].active);
        assert_eq!(loaded.filters()[1].filter.class_name(), "FourierTransform");
    }

    #[test]
    fn devices_round_trip_with_snapshot() {
        let entries = vec![DeviceEntry {
            kind: DeviceKind::Axis,
            handle: "stage".to_string(),
            driver: "simulated".to_string(),
            name: "Delay stage".to_string(),
            axis: "Delay".to_string(),
            properties: vec![("units".to_string(), "ps".to_string())],
            snapshot: vec![DeviceProperty::new("position", 1.5, "ps")],
        }];
        let xml = devices_to_xml(&entries).unwrap();
        assert_eq!(devices_from_xml(&xml).unwrap(), entries);
    }

    #[test]
    fn settings_round_trip_and_defaults() {
        let settings = CoreSettings {
            default_path: PathBuf::from("/data"),
            refresh_delay: Duration::from_millis(100),
            units: vec![("time".to_string(), "fs".to_string())],
            ..CoreSettings::default()
        };
        let xml = settings_to_xml(&settings).unwrap();
        assert_eq!(settings_from_xml(&xml).unwrap(), settings);

        let partial = r#"<config scope="terapy"><refresh_delay>soon</refresh_delay></config>"#;
        assert_eq!(settings_from_xml(partial).unwrap(), CoreSettings::default());
    }
}
