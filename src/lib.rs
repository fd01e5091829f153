//! Affinity Allocator.
//!
//! `affinity_alloc`は、割当要求を「カテゴリ(affinity)」毎に分離されたプールで処理する、
//! 汎用のブロックアロケータ.
//!
//! # 特徴
//!
//! - 用途の異なる割当(e.g., 長寿命のノード群と一時的なスクラッチバッファ)を別々のプールで扱うことで、
//!   カテゴリ間の断片化を抑える
//! - 各プールは固定長の[MemoryBlock]群を保持し、足りなくなったら新しいブロックを一つ追加する
//!   - ブロックが個別に縮小・返却されることはない
//! - ブロック内の空き領域の管理方式として、以下の二つを切り替えて使用可能:
//!   - [BoundarySlotTable]: ブロック外部に、境界オフセットのソート済みテーブルを保持する
//!   - [IntrusiveFreeList]: 空き領域自体の中にヘッダを埋め込み、サイズ階層毎の双方向リストで管理する
//! - プールで扱えない要求(巨大な要求、プールの枯渇)は[Fallback]アロケータに委譲され、
//!   それでも駄目な場合には、生のシステム割当が使われる
//!   - どの経路で割り当てられたポインタも、[AffinityAllocator::deallocate]で解放可能
//! - 全ての公開操作は、一つの粗粒度のロックで直列化される
//!
//! # モジュールの依存関係
//!
//! ```text
//! allocator => pool => block => slot
//!           => fallback
//! ```
//!
//! - [allocator]モジュール:
//!   - 利用者が直接触る[AffinityAllocator]と、そのビルダを提供
//! - [pool]モジュール:
//!   - カテゴリ毎のブロック群を管理する[BlockPool]と、アドレスからブロックを逆引きする[BlockIndex]を提供
//! - [block]モジュール:
//!   - アライメントの表現と、固定長のメモリブロックを提供
//! - [slot]モジュール:
//!   - ブロック内の空き領域の管理方式(戦略)群を提供
//! - [fallback]モジュール:
//!   - プールが扱えない割当の委譲先を提供
//!
//! [MemoryBlock]: ./block/struct.MemoryBlock.html
//! [BoundarySlotTable]: ./slot/struct.BoundarySlotTable.html
//! [IntrusiveFreeList]: ./slot/struct.IntrusiveFreeList.html
//! [Fallback]: ./fallback/trait.Fallback.html
//! [AffinityAllocator::deallocate]: ./allocator/struct.AffinityAllocator.html#method.deallocate
//! [AffinityAllocator]: ./allocator/struct.AffinityAllocator.html
//! [BlockPool]: ./pool/struct.BlockPool.html
//! [BlockIndex]: ./pool/struct.BlockIndex.html
//! [allocator]: ./allocator/index.html
//! [pool]: ./pool/index.html
//! [block]: ./block/index.html
//! [slot]: ./slot/index.html
//! [fallback]: ./fallback/index.html
#![warn(missing_docs)]
extern crate byteorder;
extern crate prometrics;
#[macro_use]
extern crate trackable;
#[macro_use]
extern crate slog;

macro_rules! track_io {
    ($expr:expr) => {
        $expr.map_err(|e: ::std::io::Error| track!(crate::Error::from(e)))
    };
}

pub use crate::allocator::{AffinityAllocator, AffinityAllocatorBuilder};
pub use crate::category::Category;
pub use crate::error::{Error, ErrorKind};

pub mod allocator;
pub mod block;
pub mod debug;
pub mod fallback;
pub mod metrics;
pub mod pool;
pub mod report;
pub mod slot;

mod category;
mod error;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
