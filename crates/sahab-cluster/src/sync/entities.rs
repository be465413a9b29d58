//! Checksum definitions per entity kind
//!
//! The checksum is a SHA-256 over a canonical string of the semantically
//! significant fields. Volatile timestamps stay out so a touch without a
//! content change never triggers a push; bucket permissions include their
//! expiry, and IDP providers include the config blob verbatim.

use serde::Serialize;

use sahab_core::types::{
    AccessKey, BucketPermission, EntityKind, GroupMapping, IdpProvider, Tenant, User,
};
use sahab_crypto::sha256_hash;

/// A directory record the generic sync engine can scan, checksum and push.
pub trait SyncEntity: Serialize + Clone + Send + Sync {
    const KIND: EntityKind;

    fn entity_id(&self) -> &str;

    /// Canonical string over the fields that define this record's content.
    fn canonical_string(&self) -> String;

    fn checksum(&self) -> String {
        sha256_hash(self.canonical_string().as_bytes())
    }
}

impl SyncEntity for Tenant {
    const KIND: EntityKind = EntityKind::Tenant;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn canonical_string(&self) -> String {
        format!(
            "tenant|{}|{}|{}|{}|{}",
            self.id,
            self.name,
            self.display_name.as_deref().unwrap_or(""),
            self.max_storage_bytes,
            self.enabled,
        )
    }
}

impl SyncEntity for User {
    const KIND: EntityKind = EntityKind::User;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn canonical_string(&self) -> String {
        format!(
            "user|{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.tenant_id,
            self.username,
            self.email.as_deref().unwrap_or(""),
            self.password_hash,
            self.role,
            self.enabled,
        )
    }
}

impl SyncEntity for AccessKey {
    const KIND: EntityKind = EntityKind::AccessKey;

    fn entity_id(&self) -> &str {
        &self.access_key_id
    }

    fn canonical_string(&self) -> String {
        format!(
            "access_key|{}|{}|{}|{}|{}|{}",
            self.access_key_id,
            self.user_id,
            self.tenant_id,
            self.secret_key,
            self.enabled,
            self.expires_at.map(|t| t.timestamp()).unwrap_or(0),
        )
    }
}

impl SyncEntity for BucketPermission {
    const KIND: EntityKind = EntityKind::BucketPermission;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn canonical_string(&self) -> String {
        format!(
            "bucket_permission|{}|{}|{}|{}|{}|{}",
            self.id,
            self.tenant_id,
            self.bucket_name,
            self.user_id,
            self.permission,
            self.expires_at.map(|t| t.timestamp()).unwrap_or(0),
        )
    }
}

impl SyncEntity for IdpProvider {
    const KIND: EntityKind = EntityKind::IdpProvider;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn canonical_string(&self) -> String {
        format!(
            "idp_provider|{}|{}|{}|{}|{}",
            self.id, self.name, self.provider_type, self.config_json, self.enabled,
        )
    }
}

impl SyncEntity for GroupMapping {
    const KIND: EntityKind = EntityKind::GroupMapping;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn canonical_string(&self) -> String {
        format!(
            "group_mapping|{}|{}|{}|{}|{}",
            self.id, self.provider_id, self.group_name, self.role, self.tenant_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_tenant;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_checksum_ignores_volatile_timestamps() {
        let mut tenant = test_tenant("t1");
        let before = tenant.checksum();

        tenant.updated_at = Utc::now();
        tenant.current_storage_bytes += 4096;
        assert_eq!(tenant.checksum(), before);

        tenant.name = "renamed".into();
        assert_ne!(tenant.checksum(), before);
    }

    #[test]
    fn test_bucket_permission_expiry_is_significant() {
        let mut permission = BucketPermission {
            id: "p1".into(),
            tenant_id: "t1".into(),
            bucket_name: "photos".into(),
            user_id: "u1".into(),
            permission: "read".into(),
            expires_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let without_expiry = permission.checksum();

        permission.expires_at = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        assert_ne!(permission.checksum(), without_expiry);
    }

    #[test]
    fn test_idp_provider_config_blob_is_significant() {
        let mut provider = IdpProvider {
            id: "idp1".into(),
            name: "corp".into(),
            provider_type: "oidc".into(),
            config_json: r#"{"issuer":"https://a"}"#.into(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let before = provider.checksum();

        provider.config_json = r#"{"issuer":"https://b"}"#.into();
        assert_ne!(provider.checksum(), before);
    }

    #[test]
    fn test_checksum_is_hex_sha256() {
        let tenant = test_tenant("t1");
        let checksum = tenant.checksum();
        assert_eq!(checksum.len(), 64);
        assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
