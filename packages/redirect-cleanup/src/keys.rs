//! Key layout inside the [`KvStore`](crate::traits::kv::KvStore).
//!
//! ```text
//! analysis:current                         cached AnalysisResult (TTL)
//! job:{job_id}                             Job record
//! mapping:{job_id}                         mapping pinned at job start
//! backup:{job_id}:{content_type}:{key}     BackupSnapshot (TTL)
//! lock:live                                id of the live job holding the lock
//! ```

use uuid::Uuid;

use crate::types::content::ContentId;

pub const ANALYSIS: &str = "analysis:current";
pub const JOB_PREFIX: &str = "job:";
pub const LIVE_LOCK: &str = "lock:live";
pub const BACKUP_PREFIX: &str = "backup:";

pub fn job(job_id: Uuid) -> String {
    format!("{JOB_PREFIX}{job_id}")
}

pub fn job_mapping(job_id: Uuid) -> String {
    format!("mapping:{job_id}")
}

pub fn backup_prefix(job_id: Uuid) -> String {
    format!("{BACKUP_PREFIX}{job_id}:")
}

pub fn backup(job_id: Uuid, content_id: &ContentId) -> String {
    format!(
        "{}{}:{}",
        backup_prefix(job_id),
        content_id.content_type,
        content_id.key
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_keys_share_the_job_prefix() {
        let id = Uuid::now_v7();
        let key = backup(id, &ContentId::post("7"));

        assert!(key.starts_with(&backup_prefix(id)));
        assert!(key.ends_with(":posts:7"));
        assert!(!key.starts_with(JOB_PREFIX));
    }
}
