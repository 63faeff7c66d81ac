//! 模型元数据：标题、作者、许可与使用权限

use std::fmt;
use std::sync::Arc;

use super::Texture;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllowedUser {
    OnlyAuthor,
    ExplicitlyLicensedPerson,
    Everyone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommercialUsage {
    Disallow,
    Allow,
    PersonalNonProfit,
    PersonalProfit,
    Corporation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreditNotation {
    Required,
    Unnecessary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModificationPermission {
    Prohibited,
    AllowModification,
    AllowModificationRedistribution,
}

/// 所有字段可选，缺失表示“未声明”
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    pub title: Option<String>,
    /// PMX 的英文名
    pub title_universal: Option<String>,
    pub comment: Option<String>,
    pub comment_universal: Option<String>,

    pub version: Option<String>,
    pub authors: Option<Vec<String>>,
    pub copyright_information: Option<String>,
    pub contact_information: Option<String>,
    pub references: Option<Vec<String>>,
    pub third_party_licenses: Option<String>,
    pub thumbnail: Option<Arc<Texture>>,

    pub license_type: Option<String>,
    pub license_url: Option<String>,
    pub spec_license_url: Option<String>,

    pub allowed_user: Option<AllowedUser>,
    pub allow_violent_usage: Option<bool>,
    pub allow_sexual_usage: Option<bool>,
    pub commercial_usage: Option<CommercialUsage>,
    pub allow_political_or_religious_usage: Option<bool>,
    pub allow_antisocial_or_hate_usage: Option<bool>,
    pub credit_notation: Option<CreditNotation>,
    pub allow_redistribution: Option<bool>,
    pub modification_permission: Option<ModificationPermission>,
    pub permission_url: Option<String>,
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn line<T: fmt::Debug>(f: &mut fmt::Formatter<'_>, label: &str, value: &Option<T>) -> fmt::Result {
            match value {
                Some(value) => writeln!(f, "{}: {:?}", label, value),
                None => Ok(()),
            }
        }

        writeln!(f, "Metadata:")?;
        line(f, "Title", &self.title)?;
        line(f, "Universal Title", &self.title_universal)?;
        line(f, "Comment", &self.comment)?;
        line(f, "Universal Comment", &self.comment_universal)?;
        line(f, "Version", &self.version)?;
        line(f, "Authors", &self.authors)?;
        line(f, "Copyright", &self.copyright_information)?;
        line(f, "Contact", &self.contact_information)?;
        line(f, "References", &self.references)?;
        line(f, "License Type", &self.license_type)?;
        line(f, "License URL", &self.license_url)?;
        line(f, "Allowed Users", &self.allowed_user)?;
        line(f, "Allow Violent Usage", &self.allow_violent_usage)?;
        line(f, "Allow Sexual Usage", &self.allow_sexual_usage)?;
        line(f, "Commercial Usage", &self.commercial_usage)?;
        line(f, "Credit Notation", &self.credit_notation)?;
        line(f, "Allow Redistribution", &self.allow_redistribution)?;
        line(f, "Modification Permission", &self.modification_permission)?;
        line(f, "Permission URL", &self.permission_url)
    }
}
