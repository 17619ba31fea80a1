mod article;
mod change;
mod filter;
mod migration;

pub use article::{Article, FormattedContent, LegacyArticle, NewArticle, RenderedField};
pub use change::{ArticleChange, ChangeKind, ChangeSet};
pub use filter::{ArticleFilter, SortKey};
pub use migration::MigrationProgress;
