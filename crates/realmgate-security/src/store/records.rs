//! Persisted record kinds and their line codecs
//!
//! User lines are `name:algorithm,salt,hash:flag1,flag2`; role and group
//! lines are `name:member1,member2`. Members and flags are kept sorted so the
//! serialized form is canonical.

use std::collections::BTreeSet;

use crate::credential::Credential;

/// A name-keyed value persisted one per line
pub trait Record: Clone + PartialEq + Send + Sync + 'static {
    /// Used in log lines and metrics labels
    const KIND: &'static str;

    fn name(&self) -> &str;

    fn to_line(&self) -> String;

    /// Parse one line, returning a human readable reason on failure
    fn parse_line(line: &str) -> Result<Self, String>;

    /// Names written next to the record name (members, flags)
    fn nested_names(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// Records holding a set of member names
pub trait Membership {
    fn members(&self) -> &BTreeSet<String>;
}

/// Names must be non-empty and free of delimiter and path characters
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
}

fn split_fields(line: &str, expected: usize) -> Result<Vec<&str>, String> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != expected {
        return Err(format!(
            "wrong number of line fields, expected {} got {}",
            expected,
            fields.len()
        ));
    }
    Ok(fields)
}

fn parse_name(name: &str) -> Result<String, String> {
    if is_valid_name(name) {
        Ok(name.to_string())
    } else {
        Err(format!("invalid name '{}'", name))
    }
}

fn parse_name_list(list: &str) -> Result<BTreeSet<String>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_name)
        .collect()
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

// ============================================================================
// Users
// ============================================================================

pub const PASSWORD_CHANGE_REQUIRED: &str = "password_change_required";
pub const IS_SUSPENDED: &str = "is_suspended";

/// A local user: name, credential and flags. Replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    name: String,
    credential: Credential,
    flags: BTreeSet<String>,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, credential: Credential) -> Self {
        Self {
            name: name.into(),
            credential,
            flags: BTreeSet::new(),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn flags(&self) -> &BTreeSet<String> {
        &self.flags
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn password_change_required(&self) -> bool {
        self.has_flag(PASSWORD_CHANGE_REQUIRED)
    }

    pub fn is_suspended(&self) -> bool {
        self.has_flag(IS_SUSPENDED)
    }

    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    #[must_use]
    pub fn without_flag(mut self, flag: &str) -> Self {
        self.flags.remove(flag);
        self
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }
}

impl Record for UserRecord {
    const KIND: &'static str = "user";

    fn name(&self) -> &str {
        &self.name
    }

    fn to_line(&self) -> String {
        format!("{}:{}:{}", self.name, self.credential, join(&self.flags))
    }

    fn parse_line(line: &str) -> Result<Self, String> {
        let fields = split_fields(line, 3)?;
        let name = parse_name(fields[0])?;
        let credential = Credential::parse(fields[1]).map_err(|e| e.to_string())?;
        let flags = parse_name_list(fields[2])?;
        Ok(Self {
            name,
            credential,
            flags,
        })
    }

    fn nested_names(&self) -> Vec<&str> {
        self.flags.iter().map(String::as_str).collect()
    }
}

// ============================================================================
// Roles and groups
// ============================================================================

fn parse_membership(line: &str) -> Result<(String, BTreeSet<String>), String> {
    let fields = split_fields(line, 2)?;
    Ok((parse_name(fields[0])?, parse_name_list(fields[1])?))
}

/// A role and the users holding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    name: String,
    users: BTreeSet<String>,
}

impl RoleRecord {
    pub fn new<I, S>(name: impl Into<String>, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            users: users.into_iter().map(Into::into).collect(),
        }
    }

    pub fn users(&self) -> &BTreeSet<String> {
        &self.users
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.users.insert(user.into());
        self
    }

    #[must_use]
    pub fn without_user(mut self, user: &str) -> Self {
        self.users.remove(user);
        self
    }
}

impl Membership for RoleRecord {
    fn members(&self) -> &BTreeSet<String> {
        &self.users
    }
}

impl Record for RoleRecord {
    const KIND: &'static str = "role";

    fn name(&self) -> &str {
        &self.name
    }

    fn to_line(&self) -> String {
        format!("{}:{}", self.name, join(&self.users))
    }

    fn parse_line(line: &str) -> Result<Self, String> {
        let (name, users) = parse_membership(line)?;
        Ok(Self { name, users })
    }

    fn nested_names(&self) -> Vec<&str> {
        self.users.iter().map(String::as_str).collect()
    }
}

/// A generic many-to-many membership, persisted like roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    name: String,
    members: BTreeSet<String>,
}

impl GroupRecord {
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.members.insert(member.into());
        self
    }

    #[must_use]
    pub fn without_member(mut self, member: &str) -> Self {
        self.members.remove(member);
        self
    }
}

impl Membership for GroupRecord {
    fn members(&self) -> &BTreeSet<String> {
        &self.members
    }
}

impl Record for GroupRecord {
    const KIND: &'static str = "group";

    fn name(&self) -> &str {
        &self.name
    }

    fn to_line(&self) -> String {
        format!("{}:{}", self.name, join(&self.members))
    }

    fn parse_line(line: &str) -> Result<Self, String> {
        let (name, members) = parse_membership(line)?;
        Ok(Self { name, members })
    }

    fn nested_names(&self) -> Vec<&str> {
        self.members.iter().map(String::as_str).collect()
    }
}
