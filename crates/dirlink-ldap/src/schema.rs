//! Lazy subschema cache
//!
//! The server publishes its schema as one RFC 4512 definition string per
//! attribute type, object class and syntax. Real schemas hold thousands of
//! definitions while a client touches a handful, so definitions are queued
//! unparsed and only parsed until the one being looked up turns up.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use dirlink_connector::config::SearchScope;
use dirlink_connector::error::{result_code, DirectoryError, DirectoryResult};
use dirlink_connector::operation::{Entry, SearchRequest};
use dirlink_connector::traits::Session;

/// Fallback subschema entry when the root DSE does not name one.
pub const DEFAULT_SUBSCHEMA_DN: &str = "cn=schema";

const KEYWORDS: &[&str] = &[
    "NAME",
    "DESC",
    "OBSOLETE",
    "SUP",
    "EQUALITY",
    "ORDERING",
    "SUBSTR",
    "SYNTAX",
    "SINGLE-VALUE",
    "COLLECTIVE",
    "NO-USER-MODIFICATION",
    "USAGE",
    "MUST",
    "MAY",
    "AUX",
    "NOT",
    "APPLIES",
    "OC",
    "FORM",
    "STRUCTURAL",
    "AUXILIARY",
    "ABSTRACT",
];

/// Keywords whose next token is always their value, even a bare word that
/// spells another keyword (`SUP name`).
const VALUE_KEYWORDS: &[&str] = &[
    "NAME", "DESC", "SUP", "EQUALITY", "ORDERING", "SUBSTR", "SYNTAX", "USAGE", "MUST", "MAY",
    "AUX", "NOT", "APPLIES", "OC", "FORM",
];

/// Schema definition group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaGroup {
    AttributeTypes,
    ObjectClasses,
    LdapSyntaxes,
}

impl SchemaGroup {
    pub const ALL: [SchemaGroup; 3] = [
        SchemaGroup::AttributeTypes,
        SchemaGroup::ObjectClasses,
        SchemaGroup::LdapSyntaxes,
    ];

    /// Attribute of the subschema entry that carries this group.
    pub fn attribute_name(self) -> &'static str {
        match self {
            SchemaGroup::AttributeTypes => "attributeTypes",
            SchemaGroup::ObjectClasses => "objectClasses",
            SchemaGroup::LdapSyntaxes => "ldapSyntaxes",
        }
    }
}

/// Parsed fields of one definition, keyed by upper-case keyword.
pub type DefinitionFields = HashMap<String, Vec<String>>;

/// Attribute type, with its syntax resolved through the `SUP` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    pub id: String,
    pub names: Vec<String>,
    pub description: Option<String>,
    pub syntax: Option<String>,
    pub superior: Option<String>,
    pub single_value: bool,
    pub read_only: bool,
    pub binary: bool,
    pub binary_transfer_required: bool,
}

/// Kind of object class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectClassKind {
    #[default]
    Structural,
    Auxiliary,
    Abstract,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectClassDefinition {
    pub id: String,
    pub names: Vec<String>,
    pub description: Option<String>,
    pub kind: ObjectClassKind,
    pub superiors: Vec<String>,
    pub must: Vec<String>,
    pub may: Vec<String>,
}

/// MUST and MAY attributes of a class including everything it inherits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassAttributes {
    pub must: Vec<String>,
    pub may: Vec<String>,
}

#[derive(Debug, Default)]
struct GroupCache {
    pending: VecDeque<String>,
    ids: HashMap<String, DefinitionFields>,
    aliases: HashMap<String, String>,
    parsed: usize,
}

impl GroupCache {
    fn new(definitions: Vec<String>) -> Self {
        Self {
            pending: definitions.into(),
            ..Self::default()
        }
    }

    fn resolved_id(&self, key: &str, normalized: &str) -> Option<String> {
        if is_numeric_oid(key) && self.ids.contains_key(key) {
            return Some(key.to_string());
        }
        self.aliases.get(normalized).cloned()
    }

    /// Find the id for `id_or_name`, parsing queued definitions as needed.
    fn lookup(&mut self, id_or_name: &str) -> Option<String> {
        let key = id_or_name.trim();
        let normalized = normalize_name(key);

        if let Some(id) = self.resolved_id(key, &normalized) {
            return Some(id);
        }

        while let Some(definition) = self.pending.pop_front() {
            self.parsed += 1;
            let Some((id, fields)) = parse_definition(&definition) else {
                debug!(definition = %definition, "Skipping unparseable schema definition");
                continue;
            };

            self.aliases.insert(id.to_ascii_lowercase(), id.clone());
            if let Some(names) = fields.get("NAME") {
                for name in names {
                    self.aliases.insert(normalize_name(name), id.clone());
                }
            }
            self.ids.insert(id, fields);

            if let Some(id) = self.resolved_id(key, &normalized) {
                return Some(id);
            }
        }

        None
    }

    fn fields(&mut self, id_or_name: &str) -> Option<&DefinitionFields> {
        let id = self.lookup(id_or_name)?;
        self.ids.get(&id)
    }
}

/// Per-connection cache of the server's subschema.
#[derive(Debug, Default)]
pub struct SchemaCache {
    attribute_types: GroupCache,
    object_classes: GroupCache,
    ldap_syntaxes: GroupCache,
    class_attributes: HashMap<String, ClassAttributes>,
}

impl SchemaCache {
    /// Cache over raw definition strings.
    pub fn new(
        attribute_types: Vec<String>,
        object_classes: Vec<String>,
        ldap_syntaxes: Vec<String>,
    ) -> Self {
        Self {
            attribute_types: GroupCache::new(attribute_types),
            object_classes: GroupCache::new(object_classes),
            ldap_syntaxes: GroupCache::new(ldap_syntaxes),
            class_attributes: HashMap::new(),
        }
    }

    /// Cache with no definitions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Cache over the definitions held by a subschema entry.
    pub fn from_entry(entry: &Entry) -> Self {
        let group = |g: SchemaGroup| entry.values_str(g.attribute_name());
        Self::new(
            group(SchemaGroup::AttributeTypes),
            group(SchemaGroup::ObjectClasses),
            group(SchemaGroup::LdapSyntaxes),
        )
    }

    fn group_mut(&mut self, group: SchemaGroup) -> &mut GroupCache {
        match group {
            SchemaGroup::AttributeTypes => &mut self.attribute_types,
            SchemaGroup::ObjectClasses => &mut self.object_classes,
            SchemaGroup::LdapSyntaxes => &mut self.ldap_syntaxes,
        }
    }

    /// Number of definitions parsed so far in `group`.
    pub fn parsed_count(&self, group: SchemaGroup) -> usize {
        match group {
            SchemaGroup::AttributeTypes => self.attribute_types.parsed,
            SchemaGroup::ObjectClasses => self.object_classes.parsed,
            SchemaGroup::LdapSyntaxes => self.ldap_syntaxes.parsed,
        }
    }

    /// All parsed fields of one definition.
    pub fn fields(&mut self, group: SchemaGroup, id_or_name: &str) -> Option<&DefinitionFields> {
        self.group_mut(group).fields(id_or_name)
    }

    /// Values of one field of a definition; empty when either is absent.
    pub fn attribute(&mut self, group: SchemaGroup, id_or_name: &str, field: &str) -> Vec<String> {
        let field = normalize_keyword(field);
        self.fields(group, id_or_name)
            .and_then(|fields| fields.get(&field))
            .cloned()
            .unwrap_or_default()
    }

    pub fn exist_name(&mut self, group: SchemaGroup, name: &str) -> bool {
        self.group_mut(group).lookup(name).is_some()
    }

    /// Canonical (first) name of a definition, or its id when it has none.
    pub fn resolve_name(&mut self, group: SchemaGroup, name: &str) -> Option<String> {
        let cache = self.group_mut(group);
        let id = cache.lookup(name)?;
        cache
            .ids
            .get(&id)
            .and_then(|fields| fields.get("NAME"))
            .and_then(|names| names.first().cloned())
            .or(Some(id))
    }

    /// Syntax OID of an attribute, following `SUP` when it declares none.
    fn syntax_of(&mut self, name: &str) -> Option<String> {
        let mut visited = HashSet::new();
        let mut current = name.to_string();

        loop {
            let fields = self.attribute_types.fields(&current)?;
            if let Some(syntax) = fields.get("SYNTAX").and_then(|v| v.first()) {
                let oid = syntax.split('{').next().unwrap_or(syntax).trim();
                return Some(oid.to_string());
            }
            let superior = fields.get("SUP").and_then(|v| v.first())?.clone();
            if !visited.insert(normalize_name(&current)) {
                debug!(attribute = %name, "Cycle in attribute SUP chain");
                return None;
            }
            current = superior;
        }
    }

    fn syntax_flag(&mut self, syntax: &str, flag: &str) -> bool {
        self.attribute(SchemaGroup::LdapSyntaxes, syntax, flag)
            .first()
            .is_some_and(|v| v.eq_ignore_ascii_case("TRUE"))
    }

    fn attribute_flag(&mut self, name: &str, flag: &str) -> bool {
        self.attribute(SchemaGroup::AttributeTypes, name, flag)
            .first()
            .is_some_and(|v| v.eq_ignore_ascii_case("TRUE"))
    }

    pub fn attribute_definition(&mut self, name: &str) -> Option<AttributeDefinition> {
        let fields = self.attribute_types.fields(name)?.clone();
        let id = self.attribute_types.lookup(name)?;
        let syntax = self.syntax_of(name);

        let (binary, binary_transfer_required) = match syntax.as_deref() {
            Some(oid) => {
                let required = self.syntax_flag(oid, "X-BINARY-TRANSFER-REQUIRED");
                let not_readable = self.syntax_flag(oid, "X-NOT-HUMAN-READABLE");
                (required || not_readable, required)
            }
            None => (false, false),
        };

        let first = |key: &str| fields.get(key).and_then(|v| v.first()).cloned();
        let flag = |key: &str| {
            fields
                .get(key)
                .and_then(|v| v.first())
                .is_some_and(|v| v.eq_ignore_ascii_case("TRUE"))
        };

        Some(AttributeDefinition {
            id,
            names: fields.get("NAME").cloned().unwrap_or_default(),
            description: first("DESC"),
            superior: first("SUP"),
            single_value: flag("SINGLE-VALUE"),
            read_only: flag("NO-USER-MODIFICATION"),
            syntax,
            binary,
            binary_transfer_required,
        })
    }

    pub fn object_class(&mut self, name: &str) -> Option<ObjectClassDefinition> {
        let id = self.object_classes.lookup(name)?;
        let fields = self.object_classes.ids.get(&id)?;
        let list = |key: &str| fields.get(key).cloned().unwrap_or_default();

        let kind = if fields.contains_key("AUXILIARY") {
            ObjectClassKind::Auxiliary
        } else if fields.contains_key("ABSTRACT") {
            ObjectClassKind::Abstract
        } else {
            ObjectClassKind::Structural
        };

        Some(ObjectClassDefinition {
            names: list("NAME"),
            description: fields.get("DESC").and_then(|v| v.first()).cloned(),
            kind,
            superiors: list("SUP"),
            must: list("MUST"),
            may: list("MAY"),
            id,
        })
    }

    /// Whether values of the attribute are binary.
    pub fn binary(&mut self, name: &str) -> bool {
        self.syntax_of(name).is_some_and(|oid| {
            self.syntax_flag(&oid, "X-NOT-HUMAN-READABLE")
                || self.syntax_flag(&oid, "X-BINARY-TRANSFER-REQUIRED")
        })
    }

    /// Whether the attribute must be transferred with the `;binary` option.
    pub fn binary_required(&mut self, name: &str) -> bool {
        self.syntax_of(name)
            .is_some_and(|oid| self.syntax_flag(&oid, "X-BINARY-TRANSFER-REQUIRED"))
    }

    pub fn read_only(&mut self, name: &str) -> bool {
        self.attribute_flag(name, "NO-USER-MODIFICATION")
    }

    pub fn single_value(&mut self, name: &str) -> bool {
        self.attribute_flag(name, "SINGLE-VALUE")
    }

    /// MUST/MAY of `object_class` and all of its superclasses, memoized.
    pub fn class_attributes(&mut self, object_class: &str) -> ClassAttributes {
        let key = normalize_name(object_class);
        if let Some(cached) = self.class_attributes.get(&key) {
            return cached.clone();
        }

        let Some(class) = self.object_class(object_class) else {
            return ClassAttributes::default();
        };

        let mut must = class.must;
        let mut may = class.may;
        let mut visited: HashSet<String> = HashSet::from([key.clone()]);
        let mut frontier = class.superiors;

        loop {
            let fresh: Vec<String> = frontier
                .into_iter()
                .filter(|sup| visited.insert(normalize_name(sup)))
                .collect();
            if fresh.is_empty() {
                break;
            }

            frontier = Vec::new();
            for sup in fresh {
                if let Some(parent) = self.object_class(&sup) {
                    must.extend(parent.must);
                    may.extend(parent.may);
                    frontier.extend(parent.superiors);
                }
            }
        }

        let attributes = ClassAttributes {
            must: dedup(must),
            may: dedup(may),
        };
        self.class_attributes.insert(key, attributes.clone());
        attributes
    }
}

/// Read the subschema entry named by the root DSE and build a cache over it.
///
/// A server without a readable subschema entry yields an empty cache.
pub async fn load<S: Session>(session: &mut S) -> DirectoryResult<SchemaCache> {
    let root_dse = SearchRequest::new("", SearchScope::Base, "(objectClass=*)")
        .with_attributes(["subschemaSubentry"]);

    let subschema_dn = match session.search(&root_dse).await {
        Ok(entries) => entries
            .first()
            .and_then(|entry| entry.first_str("subschemaSubentry")),
        Err(e) if e.is_connection_failure() => return Err(e),
        Err(e) => {
            debug!(error = %e, "Root DSE unreadable, using default subschema entry");
            None
        }
    }
    .unwrap_or_else(|| DEFAULT_SUBSCHEMA_DN.to_string());

    let request = SearchRequest::new(&subschema_dn, SearchScope::Base, "(objectClass=subschema)")
        .with_attributes(SchemaGroup::ALL.iter().map(|g| g.attribute_name()));

    let entries = match session.search(&request).await {
        Ok(entries) => entries,
        Err(DirectoryError::Directory { code, .. }) if code == result_code::NO_SUCH_OBJECT => {
            debug!(dn = %subschema_dn, "Subschema entry not found");
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let cache = entries
        .first()
        .map(SchemaCache::from_entry)
        .unwrap_or_default();

    debug!(
        dn = %subschema_dn,
        attribute_types = cache.attribute_types.pending.len(),
        object_classes = cache.object_classes.pending.len(),
        ldap_syntaxes = cache.ldap_syntaxes.pending.len(),
        "Loaded subschema"
    );

    Ok(cache)
}

fn is_numeric_oid(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Lower-case a name and strip attribute options (`userCertificate;binary`).
fn normalize_name(name: &str) -> String {
    name.split(';').next().unwrap_or(name).trim().to_ascii_lowercase()
}

fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_ascii_uppercase().replace('_', "-")
}

/// RFC 4512 keywords are upper-case; `name` or `top` as values are not keywords.
fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn takes_value(keyword: &str) -> bool {
    VALUE_KEYWORDS.contains(&keyword)
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.to_ascii_lowercase()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Dollar,
    Quoted(String),
    Bare(String),
}

fn tokenize(definition: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = definition.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '$' => {
                chars.next();
                tokens.push(Token::Dollar);
            }
            '\'' => {
                chars.next();
                let mut value = String::new();
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    value.push(c);
                }
                tokens.push(Token::Quoted(value));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '$' | '\'') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Bare(word));
            }
        }
    }

    tokens
}

/// Parse `( id KEYWORD value ... )` into its id and fields.
fn parse_definition(definition: &str) -> Option<(String, DefinitionFields)> {
    let tokens = tokenize(definition);
    let mut iter = tokens.into_iter().peekable();

    if iter.next()? != Token::Open {
        return None;
    }
    let id = match iter.next()? {
        Token::Bare(id) | Token::Quoted(id) => id,
        _ => return None,
    };

    let mut fields = DefinitionFields::new();
    while let Some(token) = iter.next() {
        let keyword = match token {
            Token::Bare(word) => normalize_keyword(&word),
            Token::Close => break,
            _ => continue,
        };

        let values = match iter.peek() {
            Some(Token::Open) => {
                iter.next();
                let mut list = Vec::new();
                for token in iter.by_ref() {
                    match token {
                        Token::Close => break,
                        Token::Bare(v) | Token::Quoted(v) => list.push(v),
                        Token::Open | Token::Dollar => {}
                    }
                }
                list
            }
            Some(Token::Quoted(_)) => match iter.next() {
                Some(Token::Quoted(v)) => vec![v],
                _ => Vec::new(),
            },
            Some(Token::Bare(word))
                if takes_value(&keyword) || (!is_keyword(word) && !word.starts_with("X-")) =>
            {
                match iter.next() {
                    Some(Token::Bare(v)) => vec![v],
                    _ => Vec::new(),
                }
            }
            _ => vec!["TRUE".to_string()],
        };

        fields.entry(keyword).or_default().extend(values);
    }

    Some((id, fields))
}
