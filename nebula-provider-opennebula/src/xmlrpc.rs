//! OpenNebula XML-RPC client
//!
//! Every OpenNebula call takes the session string as its first parameter and
//! answers with an array `[success, payload, error_code, ...]`. On failure the
//! payload is the error message.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::client::OneApi;
use crate::config::OneConfig;
use crate::error::{OneError, OneResult};
use crate::permissions::Permissions;
use crate::record::VmRecord;

/// Error code OpenNebula returns for a missing object
pub const NO_EXISTS: i64 = 0x0400;

/// Request parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Str(s.to_string())
    }
}

impl From<i64> for Param {
    fn from(n: i64) -> Self {
        Param::Int(n)
    }
}

impl From<bool> for Param {
    fn from(b: bool) -> Self {
        Param::Bool(b)
    }
}

/// Scalar found in a response
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl RpcValue {
    fn into_int(self, method: &str) -> OneResult<i64> {
        match self {
            RpcValue::Int(n) => Ok(n),
            other => Err(OneError::Xml(format!(
                "{} returned {:?}, expected an integer",
                method, other
            ))),
        }
    }

    fn into_string(self, method: &str) -> OneResult<String> {
        match self {
            RpcValue::Str(s) => Ok(s),
            other => Err(OneError::Xml(format!(
                "{} returned {:?}, expected a string",
                method, other
            ))),
        }
    }
}

/// Serialize a `methodCall` document
pub fn method_call(method: &str, params: &[Param]) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\"?>\n<methodCall><methodName>{}</methodName><params>",
        escape(method)
    );
    for param in params {
        let value = match param {
            Param::Str(s) => format!("<string>{}</string>", escape(s.as_str())),
            Param::Int(n) => format!("<int>{}</int>", n),
            Param::Bool(b) => format!("<boolean>{}</boolean>", u8::from(*b)),
        };
        body.push_str(&format!("<param><value>{}</value></param>", value));
    }
    body.push_str("</params></methodCall>");
    body
}

#[derive(Clone, Copy)]
enum Kind {
    Str,
    Int,
    Bool,
}

fn scalar(kind: Kind, text: &str) -> OneResult<RpcValue> {
    match kind {
        Kind::Str => Ok(RpcValue::Str(text.to_string())),
        Kind::Int => text
            .trim()
            .parse()
            .map(RpcValue::Int)
            .map_err(|_| OneError::Xml(format!("invalid integer '{}'", text))),
        Kind::Bool => Ok(RpcValue::Bool(text.trim() == "1")),
    }
}

/// Flatten every scalar `<value>` of a `methodResponse`, in document order.
/// The boolean is true when the response is a `<fault>`.
fn scalars(body: &str) -> OneResult<(Vec<RpcValue>, bool)> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut values = Vec::new();
    let mut fault = false;
    let mut open: Option<Kind> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"value" => {
                    open = Some(Kind::Str);
                    text.clear();
                }
                b"boolean" if open.is_some() => open = Some(Kind::Bool),
                b"i4" | b"i8" | b"int" if open.is_some() => open = Some(Kind::Int),
                b"string" if open.is_some() => open = Some(Kind::Str),
                b"fault" => fault = true,
                _ => {}
            },
            Event::Empty(e) if e.name().as_ref() == b"value" => {
                values.push(RpcValue::Str(String::new()));
            }
            Event::Text(t) if open.is_some() => text.push_str(&t.unescape()?),
            Event::CData(c) if open.is_some() => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::End(e) if e.name().as_ref() == b"value" => {
                if let Some(kind) = open.take() {
                    values.push(scalar(kind, &text)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok((values, fault))
}

/// Check the success flag of a response and return its payload
pub fn parse_response(method: &str, body: &str) -> OneResult<RpcValue> {
    let (values, fault) = scalars(body)?;
    let mut values = values.into_iter();

    if fault {
        let code = values.next();
        let message = match values.next() {
            Some(RpcValue::Str(s)) => s,
            _ => format!("fault {:?}", code),
        };
        return Err(OneError::remote(method, message));
    }

    let success = match values.next() {
        Some(RpcValue::Bool(b)) => b,
        other => {
            return Err(OneError::Xml(format!(
                "{} response does not start with a status flag: {:?}",
                method, other
            )));
        }
    };
    let payload = values
        .next()
        .ok_or_else(|| OneError::Xml(format!("{} response has no payload", method)))?;

    if success {
        return Ok(payload);
    }

    let message = match payload {
        RpcValue::Str(s) => s,
        other => format!("{:?}", other),
    };
    match values.next() {
        Some(RpcValue::Int(NO_EXISTS)) => Err(OneError::NotFound(message)),
        _ => Err(OneError::remote(method, message)),
    }
}

#[derive(Debug, Deserialize)]
struct PoolEntry {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "NAME")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct VmPool {
    #[serde(rename = "VM", default)]
    entries: Vec<PoolEntry>,
}

#[derive(Debug, Deserialize)]
struct GroupPool {
    #[serde(rename = "GROUP", default)]
    entries: Vec<PoolEntry>,
}

/// The one entry named exactly `name`
fn unique_by_name(kind: &str, name: &str, entries: Vec<PoolEntry>) -> OneResult<i64> {
    let matches: Vec<i64> = entries
        .into_iter()
        .filter(|entry| entry.name == name)
        .map(|entry| entry.id)
        .collect();

    match matches.as_slice() {
        [] => Err(OneError::NotFound(format!("{} named '{}'", kind, name))),
        [id] => Ok(*id),
        ids => Err(OneError::validation(format!(
            "{} objects of kind {} are named '{}': {:?}",
            ids.len(),
            kind,
            name,
            ids
        ))),
    }
}

/// XML-RPC implementation of [`OneApi`]
pub struct OneClient {
    http: reqwest::Client,
    config: OneConfig,
}

impl OneClient {
    pub fn new(config: OneConfig) -> OneResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn call(&self, method: &str, params: Vec<Param>) -> OneResult<RpcValue> {
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(Param::Str(self.config.session()));
        all.extend(params);

        log::debug!("XML-RPC call {}", method);
        let response = self
            .http
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "text/xml")
            .body(method_call(method, &all))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OneError::remote(method, format!("HTTP {}", status)));
        }

        parse_response(method, &body)
    }

    async fn call_unit(&self, method: &str, params: Vec<Param>) -> OneResult<()> {
        self.call(method, params).await.map(|_| ())
    }

    async fn call_int(&self, method: &str, params: Vec<Param>) -> OneResult<i64> {
        self.call(method, params).await?.into_int(method)
    }

    async fn call_document(&self, method: &str, params: Vec<Param>) -> OneResult<String> {
        self.call(method, params).await?.into_string(method)
    }
}

#[async_trait]
impl OneApi for OneClient {
    async fn vm_allocate(&self, template: &str, pending: bool) -> OneResult<i64> {
        self.call_int("one.vm.allocate", vec![template.into(), pending.into()])
            .await
    }

    async fn template_instantiate(
        &self,
        template_id: i64,
        name: &str,
        pending: bool,
        extra_template: &str,
        persistent: bool,
    ) -> OneResult<i64> {
        self.call_int(
            "one.template.instantiate",
            vec![
                template_id.into(),
                name.into(),
                pending.into(),
                extra_template.into(),
                persistent.into(),
            ],
        )
        .await
    }

    async fn vm_info(&self, id: i64) -> OneResult<VmRecord> {
        let document = self.call_document("one.vm.info", vec![id.into()]).await?;
        Ok(quick_xml::de::from_str(&document)?)
    }

    async fn vm_id_by_name(&self, name: &str) -> OneResult<i64> {
        // All VMs visible to the user, any state except DONE
        let document = self
            .call_document(
                "one.vmpool.info",
                vec![Param::Int(-2), Param::Int(-1), Param::Int(-1), Param::Int(-1)],
            )
            .await?;
        let pool: VmPool = quick_xml::de::from_str(&document)?;
        unique_by_name("virtual machine", name, pool.entries)
    }

    async fn vm_rename(&self, id: i64, name: &str) -> OneResult<()> {
        self.call_unit("one.vm.rename", vec![id.into(), name.into()])
            .await
    }

    async fn vm_chmod(&self, id: i64, permissions: &Permissions) -> OneResult<()> {
        let mut params = vec![id.into()];
        params.extend(
            permissions
                .chmod_args()
                .into_iter()
                .map(|flag| Param::Int(i64::from(flag))),
        );
        self.call_unit("one.vm.chmod", params).await
    }

    async fn vm_chown(&self, id: i64, uid: i64, gid: i64) -> OneResult<()> {
        self.call_unit("one.vm.chown", vec![id.into(), uid.into(), gid.into()])
            .await
    }

    async fn vm_terminate_hard(&self, id: i64) -> OneResult<()> {
        self.call_unit("one.vm.action", vec!["terminate-hard".into(), id.into()])
            .await
    }

    async fn group_id_by_name(&self, name: &str) -> OneResult<i64> {
        let document = self.call_document("one.grouppool.info", vec![]).await?;
        let pool: GroupPool = quick_xml::de::from_str(&document)?;
        unique_by_name("group", name, pool.entries)
    }
}
