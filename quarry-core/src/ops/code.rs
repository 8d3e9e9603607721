use crate::context::CoreContext;
use crate::error::{CoreError, Result};
use crate::proto::{
    FindSymbolParams, LocationsResponse, ReferencesParams, SymbolsParams, SymbolsResponse,
};

impl CoreContext {
    /// `code.symbols`: named definitions in one file.
    pub async fn code_symbols(&self, params: SymbolsParams) -> Result<SymbolsResponse> {
        let (_, handle) = self.resolve_handle(&params.project, None).await?;
        let stores = handle.stores.read().await;
        match stores.symbols.symbols(&params.path) {
            Some(symbols) => Ok(SymbolsResponse {
                symbols: symbols.to_vec(),
            }),
            None => Err(CoreError::NotFound(format!(
                "no symbols indexed for {}",
                params.path
            ))),
        }
    }

    /// `code.find_symbol`: definition sites across the project.
    pub async fn code_find_symbol(&self, params: FindSymbolParams) -> Result<LocationsResponse> {
        let (_, handle) = self.resolve_handle(&params.project, None).await?;
        let stores = handle.stores.read().await;
        let locations = stores.symbols.find_definition(&params.name, params.kind);
        if locations.is_empty() {
            return Err(CoreError::NotFound(format!(
                "no definition of '{}'",
                params.name
            )));
        }
        Ok(LocationsResponse { locations })
    }

    /// `code.references`: AST-matched reference sites.
    pub async fn code_references(&self, params: ReferencesParams) -> Result<LocationsResponse> {
        let (project, handle) = self.resolve_handle(&params.project, None).await?;
        let stores = handle.stores.read().await;
        let locations = stores
            .symbols
            .find_references(&params.name, &project.root, params.limit);
        Ok(LocationsResponse { locations })
    }
}
