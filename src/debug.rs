//! プロセス全体で共有されるデバッグ用のスイッチ.
//!
//! 有効にすると、アロケータの各操作の後で、操作対象のブロックの整合性検査が行われ、
//! 操作内容がデバッグレベルでロギングされるようになる.
//! 操作の結果自体は変わらない.
//!
//! 検査に失敗した場合には、プールの報告内容を添えて致命的レベルのログが出力され、
//! デバッグビルドではパニック、リリースビルドでは`ErrorKind::CorruptionDetected`エラーとなる.
//!
//! デフォルトは無効.
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(false);

/// デバッグ用の検査を有効ないし無効にする.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::SeqCst);
}

/// デバッグ用の検査が有効かどうかを判定する.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}
