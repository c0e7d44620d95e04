// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! System Singletons & Canonical Mimetypes
//!
//! Reserved UUIDs use the pattern `--<slug>--`. The singleton folders are
//! synthesized on resolution rather than stored: they always exist, cannot
//! be deleted, and carry admin ownership with authenticated read access.

/// Canonical mimetype discriminators for the node variants
pub mod mimetypes {
    pub const FOLDER: &str = "application/vnd.antbox.folder";
    pub const SMART_FOLDER: &str = "application/vnd.antbox.smartfolder";
    pub const META: &str = "application/vnd.antbox.metanode";
    pub const ASPECT: &str = "application/vnd.antbox.aspect";
    pub const USER: &str = "application/vnd.antbox.user";
    pub const GROUP: &str = "application/vnd.antbox.group";
    pub const API_KEY: &str = "application/vnd.antbox.apikey";
    pub const AGENT: &str = "application/vnd.antbox.agent";
    pub const WORKFLOW: &str = "application/vnd.antbox.workflow";
    pub const FEATURE: &str = "application/vnd.antbox.feature";
    pub const ARTICLE: &str = "application/vnd.antbox.article";

    /// All reserved `application/vnd.antbox.*` discriminators. Anything
    /// outside this prefix is a plain File mimetype.
    pub const RESERVED_PREFIX: &str = "application/vnd.antbox.";

    pub fn is_reserved(mimetype: &str) -> bool {
        mimetype.starts_with(RESERVED_PREFIX)
    }
}

/// Reserved node UUIDs
pub mod uuids {
    pub const ROOT: &str = "--root--";
    pub const ASPECTS: &str = "--aspects--";
    pub const USERS: &str = "--users--";
    pub const GROUPS: &str = "--groups--";
    pub const API_KEYS: &str = "--api-keys--";
    pub const AGENTS: &str = "--agents--";
    pub const WORKFLOWS: &str = "--workflows--";
    pub const FEATURES: &str = "--features--";
    pub const ADMINS: &str = "--admins--";
    pub const RAG_AGENT: &str = "--rag-agent--";

    pub const SYSTEM_FOLDERS: [&str; 8] = [
        ROOT, ASPECTS, USERS, GROUPS, API_KEYS, AGENTS, WORKFLOWS, FEATURES,
    ];
}

/// Root principal email. Root and anonymous are principals, not nodes: the
/// reserved `--root--` UUID belongs to the root folder.
pub const ROOT_USER_EMAIL: &str = "root@antbox.io";
pub const ANONYMOUS_USER_EMAIL: &str = "anonymous@antbox.io";

/// True for any `--slug--` reserved identifier
pub fn is_reserved_uuid(uuid: &str) -> bool {
    uuid.len() > 4 && uuid.starts_with("--") && uuid.ends_with("--")
}

/// True for the indelible singleton folders
pub fn is_system_folder(uuid: &str) -> bool {
    uuids::SYSTEM_FOLDERS.contains(&uuid)
}

/// Display title of a singleton folder
pub fn system_folder_title(uuid: &str) -> Option<&'static str> {
    match uuid {
        uuids::ROOT => Some("Root"),
        uuids::ASPECTS => Some("Aspects"),
        uuids::USERS => Some("Users"),
        uuids::GROUPS => Some("Groups"),
        uuids::API_KEYS => Some("API Keys"),
        uuids::AGENTS => Some("Agents"),
        uuids::WORKFLOWS => Some("Workflows"),
        uuids::FEATURES => Some("Features"),
        _ => None,
    }
}

/// Canonical parent for system-scoped variants. Aspects live under the
/// aspects folder, users under the users folder, and so on.
pub fn canonical_parent(mimetype: &str) -> Option<&'static str> {
    match mimetype {
        mimetypes::ASPECT => Some(uuids::ASPECTS),
        mimetypes::USER => Some(uuids::USERS),
        mimetypes::GROUP => Some(uuids::GROUPS),
        mimetypes::API_KEY => Some(uuids::API_KEYS),
        mimetypes::AGENT => Some(uuids::AGENTS),
        mimetypes::WORKFLOW => Some(uuids::WORKFLOWS),
        mimetypes::FEATURE => Some(uuids::FEATURES),
        _ => None,
    }
}
