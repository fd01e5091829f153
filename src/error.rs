use trackable::error::ErrorKindExt;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if let Some(e) = e.get_ref().and_then(|e| e.downcast_ref::<Error>()).cloned() {
            e
        } else {
            ErrorKind::Other.cause(e).into()
        }
    }
}
impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ErrorKind::Other.cause(e.to_string()).into()
    }
}

/// 発生し得るエラーの種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// カテゴリ内のどのブロックにも空きがなく、新しいブロックも確保できなかった.
    ///
    /// フォールバック経路(フォールバックアロケータおよび生の割当)も失敗した場合に返される.
    /// 内部でのリトライは行われない.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者が不要な領域を解放する
    /// - フォールバックアロケータの上限を引き上げる
    PoolExhausted,

    /// 解放対象のポインタが、どのブロック・フォールバックアロケータにも属していない.
    ///
    /// 二重解放や、割当元の取り違えといった、上位層のバグを示している.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正する
    UnknownPointer,

    /// 内部のデータ構造が破損している.
    ///
    /// `validate()`系の検査が失敗した場合に返される.
    /// 破損したフリーリストを黙って修復することはしない.
    ///
    /// # 典型的な対応策
    ///
    /// - バグ修正を行ってプログラムを更新する
    CorruptionDetected,

    /// 入力が不正.
    ///
    /// E.g., 2の冪ではないアライメント、サイズ`0`のブロック
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// その他エラー.
    ///
    /// E.g., ロックのポイズニング
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}
