/// コマンドレジストリ
///
/// コマンド名からハンドラー記述子を引く。プロセス起動時に静的なリストから
/// 一度だけ構築し、リクエスト処理中は読み取り専用で共有する。
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{CommandResult, Interaction};
use crate::infrastructure::StorageError;

/// 同期ハンドラーのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HandlerError {
    /// 入力が不正（必須オプションの欠落など）
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// ステートストアの操作に失敗
    #[error("state store error: {0}")]
    Storage(#[from] StorageError),

    /// その他の実行時エラー
    #[error("{0}")]
    Failed(String),
}

/// インタラクションを同期的に処理するハンドラー
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, interaction: &Interaction) -> Result<CommandResult, HandlerError>;
}

/// コマンドの実行方式
#[derive(Clone)]
pub enum Execution {
    /// 応答期限内にハンドラーを実行する
    Inline(Arc<dyn CommandHandler>),
    /// ワークアイテムとして下流executorに委譲する
    Deferred,
}

/// 登録済みコマンド
#[derive(Clone)]
pub struct CommandDescriptor {
    name: String,
    execution: Execution,
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("is_async", &self.is_async())
            .finish()
    }
}

impl CommandDescriptor {
    /// 同期コマンドを作成
    pub fn inline(name: impl Into<String>, handler: impl CommandHandler + 'static) -> Self {
        Self {
            name: name.into(),
            execution: Execution::Inline(Arc::new(handler)),
        }
    }

    /// 非同期コマンドを作成
    pub fn deferred(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution: Execution::Deferred,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    /// 実行を遅延するか
    pub fn is_async(&self) -> bool {
        matches!(self.execution, Execution::Deferred)
    }
}

/// レジストリ操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("duplicate command name: {0}")]
    DuplicateName(String),
}

#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandDescriptor>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 記述子のリストからレジストリを構築
    ///
    /// 名前が重複した時点でエラーを返す。
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = CommandDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// コマンドを登録する
    ///
    /// 同名のコマンドが既に登録されている場合は`DuplicateName`を返し、
    /// 先に登録されたコマンドを保持する。
    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<(), RegistryError> {
        if self.commands.contains_key(descriptor.name()) {
            return Err(RegistryError::DuplicateName(descriptor.name.clone()));
        }
        self.commands.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandDescriptor> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// 登録済みのコマンド名（昇順）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
