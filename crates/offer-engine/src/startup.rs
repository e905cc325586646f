//! 启动阶段
//!
//! 规则缓存的初始化必须成功：规则存储不可用时进程直接退出，
//! 不会带着空缓存开始消费投注。

use offer_shared::config::AppConfig;
use offer_shared::observability::metrics as engine_metrics;
use tracing::{error, info};

use crate::error::{EngineError, Result};
use crate::repository::RuleStore;
use crate::rule_cache::RuleCache;

/// 从规则存储加载全部 active 规则，构建初始缓存
pub async fn load_rule_cache(store: &dyn RuleStore) -> Result<RuleCache> {
    let rules = store.load_active_rules().await.map_err(|e| {
        error!(error = %e, "加载优惠规则失败");
        EngineError::StartupFailed(format!("加载优惠规则失败: {e}"))
    })?;

    let cache = RuleCache::from_active_rules(rules);
    engine_metrics::set_rule_cache_size(cache.len());
    info!(count = cache.len(), "已加载优惠规则");
    Ok(cache)
}

/// 校验启动配置
pub fn check_config(config: &AppConfig) -> Result<()> {
    config
        .validate()
        .map_err(|e| EngineError::StartupFailed(format!("配置非法: {e}")))
}
