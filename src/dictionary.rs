use crate::avp::{Avp, AvpType};
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use serde::Deserialize;
use serde_xml_rs::from_str;
use std::sync::Arc;
use std::sync::OnceLock;

/// In-memory Diameter catalog: applications with their commands, AVP
/// templates, and the numeric tables (command flag bits, AVP flag bits,
/// AVP type tags) hydrated from the dictionary document.
///
/// The dictionary is read-only after [`Dictionary::new`]; AVP lookups hand
/// out deep clones so callers can attach values without touching the
/// templates.
#[derive(Debug, Clone)]
pub struct Dictionary {
    apps: Vec<App>,
    avps: Vec<Avp>,
    cmd_flags: CmdBitFlags,
    avp_flags: AvpBitFlags,
    avp_types: Vec<AvpTypeDef>,
}

#[derive(Debug, Clone)]
pub struct App {
    pub id: u32,
    pub name: String,
    pub cmds: Vec<Cmd>,
}

#[derive(Debug, Clone)]
pub struct Cmd {
    pub code: u32,
    pub short: String,
    pub name: String,
    pub flags: u8,
    pub request: Vec<AvpRule>,
    pub answer: Vec<AvpRule>,
}

#[derive(Debug, Clone)]
pub struct AvpRule {
    pub name: String,
    pub required: bool,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumItem {
    pub code: i32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CmdBitFlags {
    pub r: u8,
    pub p: u8,
    pub e: u8,
    pub t: u8,
}

#[derive(Debug, Clone)]
pub struct AvpBitFlags {
    pub v: u8,
    pub m: u8,
    pub p: u8,
}

#[derive(Debug, Clone)]
pub struct AvpTypeDef {
    pub name: String,
    pub code: i32,
    pub avp_type: AvpType,
}

// Raw document shape. Unknown attributes are ignored, so dictionaries may
// carry the usual may/must-not/may-encrypt columns without declaring them
// here.

#[derive(Debug, Deserialize)]
struct DiameterXml {
    cmdflags: Option<CmdFlagsXml>,
    avpflags: Option<AvpFlagsXml>,
    #[serde(rename = "typedefn", default)]
    typedefns: Vec<TypeDefXml>,
    #[serde(rename = "application", default)]
    applications: Vec<ApplicationXml>,
}

#[derive(Debug, Deserialize)]
struct CmdFlagsXml {
    r: String,
    p: String,
    e: String,
    t: String,
}

#[derive(Debug, Deserialize)]
struct AvpFlagsXml {
    v: String,
    m: String,
    p: String,
}

#[derive(Debug, Deserialize)]
struct TypeDefXml {
    name: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct ApplicationXml {
    id: String,
    name: String,
    #[serde(rename = "command", default)]
    commands: Vec<CommandXml>,
    #[serde(rename = "avp", default)]
    avps: Vec<AvpXml>,
}

#[derive(Debug, Deserialize)]
struct CommandXml {
    code: String,
    short: String,
    name: String,
    flags: Option<String>,
    request: CommandDetailXml,
    answer: CommandDetailXml,
}

#[derive(Debug, Deserialize)]
struct CommandDetailXml {
    #[serde(rename = "rule", default)]
    rules: Vec<RuleXml>,
}

#[derive(Debug, Deserialize)]
struct RuleXml {
    avp: String,
    required: String,
    max: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvpXml {
    name: String,
    code: String,
    must: Option<String>,
    #[serde(rename = "vendor-id")]
    vendor_id: Option<String>,
    data: DataXml,
}

#[derive(Debug, Deserialize)]
struct DataXml {
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    item: Vec<ItemXml>,
    #[serde(rename = "rule", default)]
    rules: Vec<RuleXml>,
}

#[derive(Debug, Deserialize)]
struct ItemXml {
    code: String,
    name: String,
}

fn parse_num<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| Error::ParseDictionary(format!("bad {} '{}'", what, value)))
}

impl Dictionary {
    /// Parses and merges one or more dictionary documents. Applications and
    /// AVPs accumulate across documents; the flag/type tables come from the
    /// first document that defines them.
    pub fn new(docs: &[&str]) -> Result<Dictionary> {
        let mut dict = Dictionary {
            apps: Vec::new(),
            avps: Vec::new(),
            cmd_flags: CmdBitFlags {
                r: 0x80,
                p: 0x40,
                e: 0x20,
                t: 0x10,
            },
            avp_flags: AvpBitFlags {
                v: 0x80,
                m: 0x40,
                p: 0x20,
            },
            avp_types: default_avp_types(),
        };

        let mut tables_loaded = false;
        for doc in docs {
            let xml: DiameterXml =
                from_str(doc).map_err(|e| Error::ParseDictionary(e.to_string()))?;
            dict.hydrate(xml, &mut tables_loaded)?;
        }

        Ok(dict)
    }

    fn hydrate(&mut self, xml: DiameterXml, tables_loaded: &mut bool) -> Result<()> {
        if !*tables_loaded {
            if let Some(f) = &xml.cmdflags {
                self.cmd_flags = CmdBitFlags {
                    r: parse_num(&f.r, "cmd flag")?,
                    p: parse_num(&f.p, "cmd flag")?,
                    e: parse_num(&f.e, "cmd flag")?,
                    t: parse_num(&f.t, "cmd flag")?,
                };
            }
            if let Some(f) = &xml.avpflags {
                self.avp_flags = AvpBitFlags {
                    v: parse_num(&f.v, "avp flag")?,
                    m: parse_num(&f.m, "avp flag")?,
                    p: parse_num(&f.p, "avp flag")?,
                };
            }
            if !xml.typedefns.is_empty() {
                self.avp_types.clear();
                for def in &xml.typedefns {
                    self.avp_types.push(AvpTypeDef {
                        name: def.name.clone(),
                        code: parse_num(&def.code, "type tag")?,
                        avp_type: avp_type_variant(&def.name)?,
                    });
                }
                *tables_loaded = true;
            }
        }

        for app_xml in xml.applications {
            let mut app = App {
                id: parse_num(&app_xml.id, "application id")?,
                name: app_xml.name.clone(),
                cmds: Vec::new(),
            };

            for cmd_xml in &app_xml.commands {
                let flags = match &cmd_xml.flags {
                    Some(f) => parse_num(f, "command flags")?,
                    None => 0,
                };
                app.cmds.push(Cmd {
                    code: parse_num(&cmd_xml.code, "command code")?,
                    short: cmd_xml.short.clone(),
                    name: cmd_xml.name.clone(),
                    flags,
                    request: hydrate_rules(&cmd_xml.request.rules)?,
                    answer: hydrate_rules(&cmd_xml.answer.rules)?,
                });
            }
            self.apps.push(app);

            for avp_xml in &app_xml.avps {
                let avp = self.hydrate_avp(avp_xml)?;
                self.avps.push(avp);
            }
        }

        Ok(())
    }

    fn hydrate_avp(&self, xml: &AvpXml) -> Result<Avp> {
        let avp_type = self.avp_type_by_name(&xml.data.data_type).map_err(|_| {
            Error::UnknownAvpType {
                avp: xml.name.clone(),
                avp_type: xml.data.data_type.clone(),
            }
        })?;

        let mut flags: u8 = 0;
        if let Some(must) = &xml.must {
            for symbol in must.split(',') {
                match symbol.trim() {
                    "V" => flags |= self.avp_flags.v,
                    "M" => flags |= self.avp_flags.m,
                    "P" => flags |= self.avp_flags.p,
                    "-" | "" => {}
                    other => {
                        return Err(Error::ParseDictionary(format!(
                            "AVP {}: bad flag symbol '{}'",
                            xml.name, other
                        )))
                    }
                }
            }
        }

        let vendor_id = match &xml.vendor_id {
            Some(id) => parse_num(id, "vendor id")?,
            None => 0,
        };

        let mut avp = Avp::new(
            &xml.name,
            parse_num(&xml.code, "avp code")?,
            flags,
            vendor_id,
            avp_type,
        );

        if avp_type == AvpType::Enumerated {
            let mut items = Vec::new();
            for item in &xml.data.item {
                items.push(EnumItem {
                    code: parse_num(&item.code, "enum item code")?,
                    name: item.name.clone(),
                });
            }
            avp.enum_items = Some(items);
        }

        if avp_type == AvpType::Grouped {
            avp.group = Some(hydrate_rules(&xml.data.rules)?);
        }

        Ok(avp)
    }

    pub fn apps(&self) -> &[App] {
        &self.apps
    }

    pub fn avps(&self) -> &[Avp] {
        &self.avps
    }

    /// Application lookup by decimal id or (case-insensitive) name.
    pub fn get_app(&self, id: &str) -> Result<&App> {
        if let Ok(app_id) = id.trim().parse::<u32>() {
            return self.get_app_by_id(app_id);
        }
        self.apps
            .iter()
            .find(|app| app.name.eq_ignore_ascii_case(id))
            .ok_or_else(|| Error::UnknownApp(id.to_string()))
    }

    pub fn get_app_by_id(&self, id: u32) -> Result<&App> {
        self.apps
            .iter()
            .find(|app| app.id == id)
            .ok_or_else(|| Error::UnknownApp(id.to_string()))
    }

    /// Command lookup within an application by decimal code or
    /// (case-insensitive) short name.
    pub fn get_cmd<'a>(&self, id: &str, app: &'a App) -> Result<&'a Cmd> {
        if let Ok(code) = id.trim().parse::<u32>() {
            return self.get_cmd_by_code(code, app);
        }
        app.cmds
            .iter()
            .find(|cmd| cmd.short.eq_ignore_ascii_case(id))
            .ok_or_else(|| Error::UnknownCmd {
                app: app.name.clone(),
                cmd: id.to_string(),
            })
    }

    pub fn get_cmd_by_code<'a>(&self, code: u32, app: &'a App) -> Result<&'a Cmd> {
        app.cmds
            .iter()
            .find(|cmd| cmd.code == code)
            .ok_or_else(|| Error::UnknownCmd {
                app: app.name.clone(),
                cmd: code.to_string(),
            })
    }

    /// AVP template lookup by decimal code or (case-insensitive) name.
    /// Returns an owned clone; the stored template is never handed out.
    pub fn get_avp(&self, id: &str) -> Result<Avp> {
        if let Ok(code) = id.trim().parse::<u32>() {
            return self.get_avp_by_code(code);
        }
        self.get_avp_by_name(id)
    }

    pub fn get_avp_by_code(&self, code: u32) -> Result<Avp> {
        self.avps
            .iter()
            .find(|avp| avp.code == code)
            .cloned()
            .ok_or_else(|| Error::UnknownAvp(code.to_string()))
    }

    pub fn get_avp_by_name(&self, name: &str) -> Result<Avp> {
        self.avps
            .iter()
            .find(|avp| avp.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| Error::UnknownAvp(name.to_string()))
    }

    pub fn avp_flag_v(&self) -> u8 {
        self.avp_flags.v
    }

    pub fn avp_flag_m(&self) -> u8 {
        self.avp_flags.m
    }

    pub fn avp_flag_p(&self) -> u8 {
        self.avp_flags.p
    }

    pub fn cmd_flag_r(&self) -> u8 {
        self.cmd_flags.r
    }

    pub fn cmd_flag_p(&self) -> u8 {
        self.cmd_flags.p
    }

    pub fn cmd_flag_e(&self) -> u8 {
        self.cmd_flags.e
    }

    pub fn cmd_flag_t(&self) -> u8 {
        self.cmd_flags.t
    }

    pub fn avp_type_by_name(&self, name: &str) -> Result<AvpType> {
        self.avp_types
            .iter()
            .find(|def| def.name.eq_ignore_ascii_case(name))
            .map(|def| def.avp_type)
            .ok_or_else(|| Error::UnknownAvpType {
                avp: String::new(),
                avp_type: name.to_string(),
            })
    }

    /// Numeric tag of a type as declared by the document's type table.
    pub fn avp_type_tag(&self, avp_type: AvpType) -> Option<i32> {
        self.avp_types
            .iter()
            .find(|def| def.avp_type == avp_type)
            .map(|def| def.code)
    }

    /// Integrity pass over the loaded catalog. Each finding is logged;
    /// the number of findings is returned.
    pub fn verify(&self) -> usize {
        let mut err_found = 0;

        for app in &self.apps {
            for cmd in &app.cmds {
                for rule in &cmd.request {
                    if self.get_avp_by_name(&rule.name).is_err() {
                        log::warn!("{}/{}R: unknown AVP \"{}\"", app.name, cmd.short, rule.name);
                        err_found += 1;
                    }
                }
                for rule in &cmd.answer {
                    if self.get_avp_by_name(&rule.name).is_err() {
                        log::warn!("{}/{}A: unknown AVP \"{}\"", app.name, cmd.short, rule.name);
                        err_found += 1;
                    }
                }
            }
        }

        for (i, avp) in self.avps.iter().enumerate() {
            if let Some(dup) = self.avps[..i].iter().find(|prev| prev.code == avp.code) {
                log::warn!(
                    "duplicated code {} for AVPs \"{}\" and \"{}\"",
                    avp.code,
                    dup.name,
                    avp.name
                );
                err_found += 1;
            }
        }

        for avp in &self.avps {
            if avp.flags & self.avp_flags.v != 0 && avp.vendor_id == 0 {
                log::warn!("AVP \"{}\" V-flag present without vendor id", avp.name);
                err_found += 1;
            }
        }

        for avp in &self.avps {
            if let Some(members) = &avp.group {
                for member in members {
                    if self.get_avp_by_name(&member.name).is_err() {
                        log::warn!(
                            "AVP \"{}\" unknown group member: \"{}\"",
                            avp.name,
                            member.name
                        );
                        err_found += 1;
                    }
                }
            }
        }

        if err_found > 0 {
            log::warn!("dictionary verify: {} errors", err_found);
        }
        err_found
    }
}

fn hydrate_rules(rules: &[RuleXml]) -> Result<Vec<AvpRule>> {
    let mut out = Vec::with_capacity(rules.len());
    for rule in rules {
        let max = match &rule.max {
            Some(max) => parse_num(max, "rule max")?,
            None => 0,
        };
        out.push(AvpRule {
            name: rule.avp.clone(),
            required: rule.required.eq_ignore_ascii_case("true"),
            max,
        });
    }
    Ok(out)
}

fn default_avp_types() -> Vec<AvpTypeDef> {
    let names = [
        "OctetString",
        "Integer32",
        "Integer64",
        "Unsigned32",
        "Unsigned64",
        "Float32",
        "Float64",
        "Address",
        "Time",
        "UTF8String",
        "DiameterIdentity",
        "DiameterURI",
        "IPFilterRule",
        "QoSFilterRule",
        "Enumerated",
        "Grouped",
    ];
    names
        .iter()
        .enumerate()
        .map(|(i, name)| AvpTypeDef {
            name: name.to_string(),
            code: i as i32 + 1,
            avp_type: avp_type_variant(name).expect("known type name"),
        })
        .collect()
}

fn avp_type_variant(name: &str) -> Result<AvpType> {
    match name {
        "OctetString" => Ok(AvpType::OctetString),
        "Integer32" => Ok(AvpType::Integer32),
        "Integer64" => Ok(AvpType::Integer64),
        "Unsigned32" => Ok(AvpType::Unsigned32),
        "Unsigned64" => Ok(AvpType::Unsigned64),
        "Float32" => Ok(AvpType::Float32),
        "Float64" => Ok(AvpType::Float64),
        "Address" => Ok(AvpType::Address),
        "Time" => Ok(AvpType::Time),
        "UTF8String" => Ok(AvpType::UTF8String),
        "DiameterIdentity" => Ok(AvpType::Identity),
        "DiameterURI" => Ok(AvpType::DiameterURI),
        "IPFilterRule" => Ok(AvpType::IPFilterRule),
        "QoSFilterRule" => Ok(AvpType::QoSFilterRule),
        "Enumerated" => Ok(AvpType::Enumerated),
        "Grouped" => Ok(AvpType::Grouped),
        other => Err(Error::UnknownAvpType {
            avp: String::new(),
            avp_type: other.to_string(),
        }),
    }
}

static ACTIVE: OnceLock<Arc<Dictionary>> = OnceLock::new();

/// Installs the process-wide dictionary. Only the first call takes effect;
/// later calls are logged and ignored (the dictionary is read-only once
/// loaded).
pub fn load(docs: &[&str]) -> Result<Arc<Dictionary>> {
    let dict = Arc::new(Dictionary::new(docs)?);
    let installed = ACTIVE.get_or_init(|| Arc::clone(&dict));
    if !Arc::ptr_eq(installed, &dict) {
        log::warn!("dictionary already loaded, keeping the existing one");
    }
    Ok(Arc::clone(installed))
}

/// The process-wide dictionary, falling back to the built-in document.
pub fn active() -> Arc<Dictionary> {
    Arc::clone(ACTIVE.get_or_init(|| Arc::new(DEFAULT_DICT.clone())))
}

lazy_static! {
    pub static ref DEFAULT_DICT: Dictionary =
        Dictionary::new(&[DEFAULT_DICT_XML]).expect("built-in dictionary is valid");
}

pub const DEFAULT_DICT_XML: &str = r#"
<diameter>
    <cmdflags r="128" p="64" e="32" t="16"/>
    <avpflags v="128" m="64" p="32"/>

    <typedefn name="OctetString" code="1"/>
    <typedefn name="Integer32" code="2"/>
    <typedefn name="Integer64" code="3"/>
    <typedefn name="Unsigned32" code="4"/>
    <typedefn name="Unsigned64" code="5"/>
    <typedefn name="Float32" code="6"/>
    <typedefn name="Float64" code="7"/>
    <typedefn name="Address" code="8"/>
    <typedefn name="Time" code="9"/>
    <typedefn name="UTF8String" code="10"/>
    <typedefn name="DiameterIdentity" code="11"/>
    <typedefn name="DiameterURI" code="12"/>
    <typedefn name="IPFilterRule" code="13"/>
    <typedefn name="QoSFilterRule" code="14"/>
    <typedefn name="Enumerated" code="15"/>
    <typedefn name="Grouped" code="16"/>

    <application id="0" name="Base">
        <command code="257" short="CE" name="Capabilities-Exchange" flags="0">
            <request>
                <rule avp="Origin-Host" required="true" max="1"/>
                <rule avp="Origin-Realm" required="true" max="1"/>
                <rule avp="Host-IP-Address" required="true"/>
                <rule avp="Vendor-Id" required="true" max="1"/>
                <rule avp="Product-Name" required="true" max="1"/>
                <rule avp="Origin-State-Id" required="false" max="1"/>
                <rule avp="Auth-Application-Id" required="false"/>
                <rule avp="Firmware-Revision" required="false" max="1"/>
            </request>
            <answer>
                <rule avp="Result-Code" required="true" max="1"/>
                <rule avp="Origin-Host" required="true" max="1"/>
                <rule avp="Origin-Realm" required="true" max="1"/>
                <rule avp="Host-IP-Address" required="true"/>
                <rule avp="Vendor-Id" required="true" max="1"/>
                <rule avp="Product-Name" required="true" max="1"/>
                <rule avp="Auth-Application-Id" required="false"/>
                <rule avp="Error-Message" required="false" max="1"/>
            </answer>
        </command>

        <command code="280" short="DW" name="Device-Watchdog" flags="0">
            <request>
                <rule avp="Origin-Host" required="true" max="1"/>
                <rule avp="Origin-Realm" required="true" max="1"/>
                <rule avp="Origin-State-Id" required="false" max="1"/>
            </request>
            <answer>
                <rule avp="Result-Code" required="true" max="1"/>
                <rule avp="Origin-Host" required="true" max="1"/>
                <rule avp="Origin-Realm" required="true" max="1"/>
                <rule avp="Error-Message" required="false" max="1"/>
            </answer>
        </command>

        <command code="282" short="DP" name="Disconnect-Peer" flags="0">
            <request>
                <rule avp="Origin-Host" required="true" max="1"/>
                <rule avp="Origin-Realm" required="true" max="1"/>
                <rule avp="Disconnect-Cause" required="false" max="1"/>
            </request>
            <answer>
                <rule avp="Result-Code" required="true" max="1"/>
                <rule avp="Origin-Host" required="true" max="1"/>
                <rule avp="Origin-Realm" required="true" max="1"/>
                <rule avp="Error-Message" required="false" max="1"/>
            </answer>
        </command>

        <avp name="Session-Id" code="263" must="M" may="P" must-not="V" may-encrypt="Y">
            <data type="UTF8String"/>
        </avp>

        <avp name="Origin-Host" code="264" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="DiameterIdentity"/>
        </avp>

        <avp name="Origin-Realm" code="296" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="DiameterIdentity"/>
        </avp>

        <avp name="Destination-Host" code="293" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="DiameterIdentity"/>
        </avp>

        <avp name="Destination-Realm" code="283" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="DiameterIdentity"/>
        </avp>

        <avp name="Host-IP-Address" code="257" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="Address"/>
        </avp>

        <avp name="Vendor-Id" code="266" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="Unsigned32"/>
        </avp>

        <avp name="Product-Name" code="269" must="-" may="-" must-not="P,V,M" may-encrypt="-">
            <data type="UTF8String"/>
        </avp>

        <avp name="Origin-State-Id" code="278" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="Unsigned32"/>
        </avp>

        <avp name="Result-Code" code="268" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="Unsigned32"/>
        </avp>

        <avp name="Error-Message" code="281" must="-" may="P" must-not="V,M" may-encrypt="-">
            <data type="UTF8String"/>
        </avp>

        <avp name="Auth-Application-Id" code="258" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="Unsigned32"/>
        </avp>

        <avp name="Firmware-Revision" code="267" must="-" may="-" must-not="P,V,M" may-encrypt="-">
            <data type="Unsigned32"/>
        </avp>

        <avp name="Event-Timestamp" code="55" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="Time"/>
        </avp>

        <avp name="Disconnect-Cause" code="273" must="M" may="P" must-not="V" may-encrypt="-">
            <data type="Enumerated">
                <item code="0" name="REBOOTING"/>
                <item code="1" name="BUSY"/>
                <item code="2" name="DO_NOT_WANT_TO_TALK_TO_YOU"/>
            </data>
        </avp>
    </application>

    <application id="4" name="Credit-Control">
        <command code="272" short="CC" name="Credit-Control" flags="64">
            <request>
                <rule avp="Session-Id" required="true" max="1"/>
                <rule avp="Origin-Host" required="true" max="1"/>
                <rule avp="Origin-Realm" required="true" max="1"/>
                <rule avp="Destination-Realm" required="true" max="1"/>
                <rule avp="Auth-Application-Id" required="true"/>
                <rule avp="CC-Request-Type" required="true" max="1"/>
                <rule avp="CC-Request-Number" required="true" max="1"/>
                <rule avp="Destination-Host" required="false" max="1"/>
                <rule avp="Event-Timestamp" required="false" max="1"/>
                <rule avp="Subscription-Id" required="false"/>
                <rule avp="Visited-PLMN-Id" required="false" max="1"/>
            </request>
            <answer>
                <rule avp="Session-Id" required="true" max="1"/>
                <rule avp="Result-Code" required="true" max="1"/>
                <rule avp="Origin-Host" required="true" max="1"/>
                <rule avp="Origin-Realm" required="true" max="1"/>
                <rule avp="Auth-Application-Id" required="false"/>
                <rule avp="CC-Request-Type" required="false" max="1"/>
                <rule avp="CC-Request-Number" required="false" max="1"/>
                <rule avp="Event-Timestamp" required="false" max="1"/>
            </answer>
        </command>

        <avp name="CC-Request-Type" code="416" must="M" may="P" must-not="V" may-encrypt="Y">
            <data type="Enumerated">
                <item code="1" name="INITIAL_REQUEST"/>
                <item code="2" name="UPDATE_REQUEST"/>
                <item code="3" name="TERMINATION_REQUEST"/>
            </data>
        </avp>

        <avp name="CC-Request-Number" code="415" must="M" may="P" must-not="V" may-encrypt="Y">
            <data type="Unsigned32"/>
        </avp>

        <avp name="Subscription-Id" code="443" must="M" may="P" must-not="V" may-encrypt="Y">
            <data type="Grouped">
                <rule avp="Subscription-Id-Type" required="true" max="1"/>
                <rule avp="Subscription-Id-Data" required="true" max="1"/>
            </data>
        </avp>

        <avp name="Subscription-Id-Type" code="450" must="M" may="P" must-not="V" may-encrypt="Y">
            <data type="Enumerated">
                <item code="0" name="END_USER_E164"/>
                <item code="1" name="END_USER_IMSI"/>
                <item code="2" name="END_USER_SIP_URI"/>
                <item code="3" name="END_USER_NAI"/>
                <item code="4" name="END_USER_PRIVATE"/>
            </data>
        </avp>

        <avp name="Subscription-Id-Data" code="444" must="M" may="P" must-not="V" may-encrypt="Y">
            <data type="UTF8String"/>
        </avp>

        <avp name="Visited-PLMN-Id" code="1407" must="V,M" may="-" must-not="-" may-encrypt="N" vendor-id="10415">
            <data type="OctetString"/>
        </avp>
    </application>
</diameter>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dict_parses() {
        let dict = &DEFAULT_DICT;
        assert_eq!(dict.apps().len(), 2);
        let base = dict.get_app_by_id(0).unwrap();
        assert_eq!(base.name, "Base");
        assert_eq!(base.cmds.len(), 3);
    }

    #[test]
    fn test_lookup_by_name_is_case_insensitive() {
        let dict = &DEFAULT_DICT;
        let app = dict.get_app("credit-control").unwrap();
        assert_eq!(app.id, 4);
        let cmd = dict.get_cmd("cc", app).unwrap();
        assert_eq!(cmd.code, 272);
        let avp = dict.get_avp("origin-host").unwrap();
        assert_eq!(avp.code, 264);
    }

    #[test]
    fn test_lookup_by_decimal_string() {
        let dict = &DEFAULT_DICT;
        let app = dict.get_app("0").unwrap();
        assert_eq!(app.name, "Base");
        let avp = dict.get_avp("268").unwrap();
        assert_eq!(avp.name, "Result-Code");
    }

    #[test]
    fn test_get_avp_returns_clone() {
        let dict = &DEFAULT_DICT;
        let mut avp = dict.get_avp("Result-Code").unwrap();
        avp.set_value(crate::avp::Unsigned32::new(5012).into()).unwrap();
        // the template is untouched
        let again = dict.get_avp("Result-Code").unwrap();
        assert!(again.data.is_none());
    }

    #[test]
    fn test_unknown_lookups() {
        let dict = &DEFAULT_DICT;
        assert!(matches!(dict.get_app("no-such-app"), Err(Error::UnknownApp(_))));
        assert!(matches!(dict.get_avp("no-such-avp"), Err(Error::UnknownAvp(_))));
        let base = dict.get_app_by_id(0).unwrap();
        assert!(matches!(
            dict.get_cmd("XX", base),
            Err(Error::UnknownCmd { .. })
        ));
    }

    #[test]
    fn test_side_tables() {
        let dict = &DEFAULT_DICT;
        assert_eq!(dict.cmd_flag_r(), 0x80);
        assert_eq!(dict.avp_flag_v(), 0x80);
        assert_eq!(dict.avp_type_by_name("Grouped").unwrap(), AvpType::Grouped);
        assert_eq!(dict.avp_type_tag(AvpType::OctetString), Some(1));
    }

    #[test]
    fn test_vendor_flag_hydration() {
        let avp = DEFAULT_DICT.get_avp("Visited-PLMN-Id").unwrap();
        assert!(avp.is_vendor_specific());
        assert!(avp.is_mandatory());
        assert_eq!(avp.vendor_id, 10415);
    }

    #[test]
    fn test_grouped_members_hydration() {
        let avp = DEFAULT_DICT.get_avp("Subscription-Id").unwrap();
        let members = avp.group.as_ref().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name, "Subscription-Id-Type");
        assert!(members[0].required);
        assert_eq!(members[0].max, 1);
    }

    #[test]
    fn test_verify_default_dict_clean() {
        assert_eq!(DEFAULT_DICT.verify(), 0);
    }

    #[test]
    fn test_verify_reports_faults() {
        let xml = r#"
<diameter>
    <application id="9" name="Broken">
        <command code="1" short="BR" name="Broken-Request" flags="0">
            <request>
                <rule avp="No-Such-Avp" required="true" max="1"/>
            </request>
            <answer>
                <rule avp="Dup-A" required="true" max="1"/>
            </answer>
        </command>
        <avp name="Vendor-Flagged" code="700" must="V" may="-" must-not="-" may-encrypt="-">
            <data type="Unsigned32"/>
        </avp>
        <avp name="Dup-A" code="701" must="-" may="-" must-not="-" may-encrypt="-">
            <data type="Unsigned32"/>
        </avp>
        <avp name="Dup-B" code="701" must="-" may="-" must-not="-" may-encrypt="-">
            <data type="Unsigned32"/>
        </avp>
        <avp name="Group-Broken" code="702" must="-" may="-" must-not="-" may-encrypt="-">
            <data type="Grouped">
                <rule avp="Missing-Member" required="false" max="1"/>
            </data>
        </avp>
    </application>
</diameter>
"#;
        let dict = Dictionary::new(&[xml]).unwrap();
        // unknown rule, V-flag without vendor id, duplicate code, broken member
        assert_eq!(dict.verify(), 4);
    }

    #[test]
    fn test_merge_multiple_documents() {
        let extra = r#"
<diameter>
    <application id="99" name="Lab">
        <avp name="Lab-Counter" code="60000" must="M" may="-" must-not="V" may-encrypt="-">
            <data type="Unsigned64"/>
        </avp>
    </application>
</diameter>
"#;
        let dict = Dictionary::new(&[DEFAULT_DICT_XML, extra]).unwrap();
        assert_eq!(dict.get_avp("Lab-Counter").unwrap().code, 60000);
        assert!(dict.get_app("Lab").is_ok());
        // base content still present
        assert!(dict.get_avp("Origin-Host").is_ok());
    }
}
