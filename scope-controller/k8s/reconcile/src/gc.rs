use crate::{
    binding::BindingKind,
    store::{Result, Store},
};
use scope_controller_k8s_api::Selector;

/// Deletes every binding, of either kind and in any namespace, that matches
/// `selector`. Returns the number of bindings deleted.
///
/// Bindings that disappear before they can be deleted are skipped. Any other
/// failure aborts the sweep; it is safe to run again.
pub async fn delete_matching<S: Store + ?Sized>(store: &S, selector: &Selector) -> Result<usize> {
    let mut deleted = 0;
    for kind in BindingKind::ALL {
        for binding in store.list_bindings(kind, None, selector).await? {
            match store.delete_binding(&binding).await {
                Ok(()) => {
                    tracing::info!(%binding, "Deleted");
                    deleted += 1;
                }
                Err(error) if error.is_not_found() => {
                    tracing::debug!(%binding, "Already deleted");
                }
                Err(error) => return Err(error),
            }
        }
    }
    Ok(deleted)
}
