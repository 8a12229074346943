use serde_json::Value;

use super::{
    DerivedField, EntityRegistry, EntitySpec, FieldRule, FieldType, IndexSpec, KeyPattern,
    Origin,
};

use FieldRule::{Copy, Drop, ForeignKey, Renamed, Typed};
use FieldType::{Boolean, Integer, String, Timestamp};

impl EntityRegistry {
    /// Customer, organization, custom domain, receipt and secret models.
    pub fn default_v2() -> Self {
        Self::new(vec![
            customer(),
            organization(),
            custom_domain(),
            receipt(),
            secret(),
        ])
    }
}

fn customer() -> EntitySpec {
    EntitySpec {
        model: "customer",
        v1: KeyPattern::new("customer"),
        v2: KeyPattern::new("customer"),
        origin: Origin::Dump,
        identifier_field: "custid",
        created_field: "created",
        fields: vec![
            ("email", Typed(String)),
            ("role", Typed(String)),
            ("verified", Typed(Boolean)),
            ("planid", Typed(String)),
            ("apitoken", Copy),
            ("passphrase", Copy),
            ("passphrase_encryption", Typed(Integer)),
            ("locale", Typed(String)),
            ("created", Typed(Timestamp)),
            ("updated", Typed(Timestamp)),
            ("last_login", Typed(Timestamp)),
            ("secrets_created", Typed(Integer)),
            ("secrets_burned", Typed(Integer)),
            ("secrets_shared", Typed(Integer)),
            ("emails_sent", Typed(Integer)),
            ("stripe_customer_id", Typed(String)),
            ("stripe_subscription_id", Typed(String)),
            ("stripe_checkout_email", Typed(String)),
            ("contributor", Typed(Boolean)),
            ("key", Drop),
            ("sessid", Drop),
        ],
        derived: vec![],
        constants: vec![],
        renames: vec![("metadata", "receipts"), ("custom_domain", "custom_domains")],
        depends_on: vec![],
        binary_safe: false,
        extid_prefix: "ur",
        indexes: vec![
            IndexSpec::Instance {
                key: "customer:instances",
                score: "created",
            },
            IndexSpec::Lookup {
                key: "customer:email_index",
                field: "email",
            },
            IndexSpec::Lookup {
                key: "customer:extid_lookup",
                field: "extid",
            },
        ],
    }
}

/// One default organization per customer, owned by that customer.
fn organization() -> EntitySpec {
    EntitySpec {
        model: "organization",
        v1: KeyPattern::new("customer"),
        v2: KeyPattern::new("organization"),
        origin: Origin::DerivedFrom("customer"),
        identifier_field: "org_id",
        created_field: "created",
        fields: vec![
            (
                "custid",
                ForeignKey {
                    model: "customer",
                    rename: Some("owner_id"),
                },
            ),
            ("email", Renamed("contact_email", String)),
            ("planid", Typed(String)),
            ("created", Typed(Timestamp)),
            ("updated", Typed(Timestamp)),
            ("stripe_customer_id", Typed(String)),
            ("stripe_subscription_id", Typed(String)),
            ("stripe_checkout_email", Renamed("billing_email", String)),
        ],
        derived: vec![],
        constants: vec![("is_default", Value::Bool(true))],
        renames: vec![],
        depends_on: vec!["customer"],
        binary_safe: false,
        extid_prefix: "on",
        indexes: vec![
            IndexSpec::Instance {
                key: "organization:instances",
                score: "created",
            },
            IndexSpec::Lookup {
                key: "organization:contact_email_index",
                field: "contact_email",
            },
            IndexSpec::Lookup {
                key: "organization:stripe_customer_id_index",
                field: "stripe_customer_id",
            },
            IndexSpec::Lookup {
                key: "organization:extid_lookup",
                field: "extid",
            },
            IndexSpec::Participation {
                key: "organization:{objid}:members",
                member: "owner_id",
                score: "created",
            },
            IndexSpec::Participation {
                key: "customer:{owner_id}:organizations",
                member: "objid",
                score: "created",
            },
        ],
    }
}

fn custom_domain() -> EntitySpec {
    EntitySpec {
        model: "custom_domain",
        v1: KeyPattern::new("customdomain"),
        v2: KeyPattern::new("custom_domain"),
        origin: Origin::Dump,
        identifier_field: "domainid",
        created_field: "created",
        fields: vec![
            ("display_domain", Typed(String)),
            (
                "custid",
                ForeignKey {
                    model: "customer",
                    rename: None,
                },
            ),
            ("base_domain", Typed(String)),
            ("subdomain", Typed(String)),
            ("trd", Typed(String)),
            ("tld", Typed(String)),
            ("sld", Typed(String)),
            ("txt_validation_host", Typed(String)),
            ("txt_validation_value", Typed(String)),
            ("status", Typed(String)),
            ("vhost", Copy),
            ("verified", Typed(Boolean)),
            ("resolving", Typed(Boolean)),
            ("created", Typed(Timestamp)),
            ("updated", Typed(Timestamp)),
        ],
        derived: vec![DerivedField {
            target: "org_id",
            source: "custid",
            model: "organization",
        }],
        constants: vec![],
        renames: vec![("brand", "brand"), ("logo", "logo")],
        depends_on: vec!["customer", "organization"],
        binary_safe: false,
        extid_prefix: "cd",
        indexes: vec![
            IndexSpec::Instance {
                key: "custom_domain:instances",
                score: "created",
            },
            IndexSpec::Lookup {
                key: "custom_domain:display_domain_index",
                field: "display_domain",
            },
            IndexSpec::Participation {
                key: "organization:{org_id}:domains",
                member: "objid",
                score: "created",
            },
            IndexSpec::Counter {
                key: "organization:{org_id}:domain_count",
                by: 1,
            },
        ],
    }
}

fn receipt() -> EntitySpec {
    EntitySpec {
        model: "receipt",
        v1: KeyPattern::new("metadata"),
        v2: KeyPattern::new("receipt"),
        origin: Origin::Dump,
        identifier_field: "key",
        created_field: "created",
        fields: vec![
            (
                "custid",
                ForeignKey {
                    model: "customer",
                    rename: None,
                },
            ),
            (
                "secret_key",
                ForeignKey {
                    model: "secret",
                    rename: Some("secret_identifier"),
                },
            ),
            ("state", Typed(String)),
            ("secret_shortkey", Typed(String)),
            ("share_domain", Typed(String)),
            ("passphrase", Copy),
            ("recipients", Typed(String)),
            ("memo", Typed(String)),
            ("lifespan", Typed(Integer)),
            ("truncate", Typed(Boolean)),
            ("viewed", Typed(Timestamp)),
            ("received", Typed(Timestamp)),
            ("burned", Typed(Timestamp)),
            ("shared", Typed(Timestamp)),
            ("created", Typed(Timestamp)),
            ("updated", Typed(Timestamp)),
        ],
        derived: vec![],
        constants: vec![],
        renames: vec![],
        depends_on: vec!["customer"],
        binary_safe: false,
        extid_prefix: "rc",
        indexes: vec![IndexSpec::Instance {
            key: "receipt:instances",
            score: "created",
        }],
    }
}

fn secret() -> EntitySpec {
    EntitySpec {
        model: "secret",
        v1: KeyPattern::new("secret"),
        v2: KeyPattern::new("secret"),
        origin: Origin::Dump,
        identifier_field: "key",
        created_field: "created",
        fields: vec![
            (
                "custid",
                ForeignKey {
                    model: "customer",
                    rename: None,
                },
            ),
            (
                "metadata_key",
                ForeignKey {
                    model: "receipt",
                    rename: Some("receipt_identifier"),
                },
            ),
            ("value", Copy),
            ("value_encryption", Typed(Integer)),
            ("passphrase", Copy),
            ("passphrase_encryption", Typed(Integer)),
            ("state", Typed(String)),
            ("lifespan", Typed(Integer)),
            ("share_domain", Typed(String)),
            ("truncated", Typed(Boolean)),
            ("original_size", Typed(Integer)),
            ("verification", Typed(Boolean)),
            ("created", Typed(Timestamp)),
            ("updated", Typed(Timestamp)),
        ],
        derived: vec![],
        constants: vec![],
        renames: vec![],
        depends_on: vec!["customer", "receipt"],
        binary_safe: true,
        extid_prefix: "se",
        indexes: vec![IndexSpec::Instance {
            key: "secret:instances",
            score: "created",
        }],
    }
}
