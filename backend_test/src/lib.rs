use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, spanned::Spanned, FnArg, GenericArgument, Ident, ItemFn, Pat, PathArguments,
    Signature, Type,
};

/// Which backing store a test runs against.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Backend {
    /// The in-memory store and a scripted similarity oracle.
    Memory,
    /// A throwaway MongoDB database, dropped afterwards.
    Mongo,
}

/// Transform an asynchronous test into a synchronous one and inject its
/// dependencies by parameter type.
///
/// By default the injectable dependencies are
/// [`rocket::local::asynchronous::Client`], `crate::testing::TestStore` and
/// `crate::testing::TestOracle`, all sharing the same state.
///
/// With `#[backend_test(mongo)]` they are [`mongodb::Database`],
/// `crate::model::ledger::MongoStore` and `crate::model::mongodb::Coll<T>`.
/// Such tests need a live replica set, so they are ignored unless the
/// `db-tests` feature is enabled, and the database is dropped regardless of
/// how the test terminates.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    let backend = match parse_macro_input!(args as Option<Ident>) {
        None => Backend::Memory,
        Some(arg) if arg == "mongo" => Backend::Mongo,
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `mongo`")
                .into_compile_error()
                .into();
        }
    };

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone(), backend) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    match backend {
        Backend::Memory => memory_test(name, new_name, item_fn, test_args),
        Backend::Mongo => mongo_test(name, new_name, item_fn, test_args),
    }
    .into()
}

fn memory_test(
    name: Ident,
    new_name: Ident,
    item_fn: ItemFn,
    test_args: Vec<TokenStream2>,
) -> TokenStream2 {
    quote! {
        #[test]
        fn #name() {
            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                #[allow(unused_variables)]
                let (rocket_client, store, oracle) = crate::testing::setup().await;
                #new_name(#(#test_args),*).await;
            });
        }
    }
}

fn mongo_test(
    name: Ident,
    new_name: Ident,
    item_fn: ItemFn,
    test_args: Vec<TokenStream2>,
) -> TokenStream2 {
    quote! {
        #[test]
        #[cfg_attr(not(feature = "db-tests"), ignore)]
        fn #name() {
            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(db: mongodb::Database) {
                db.drop(None).await.unwrap();
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (db_client, db) = outer_runtime.block_on(crate::testing::mongo_setup());

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(db_client);
            let db_mutex = std::sync::Mutex::new(db.clone());
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                #[allow(unused_variables)]
                let db_client = client_mutex.into_inner().unwrap();
                let db = db_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            outer_runtime.block_on(cleanup(db));

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }
        }
    }
}

/// Ensure the wrapped test is async and map each parameter, in order, to the
/// expression that provides it. Unknown or repeated parameters are rejected.
fn check_sig(sig: Signature, backend: Backend) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let singletons: Vec<(&str, TokenStream2)> = match backend {
        Backend::Memory => vec![
            ("Client", quote! { rocket_client }),
            ("TestStore", quote! { store.clone() }),
            ("TestOracle", quote! { oracle.clone() }),
        ],
        Backend::Mongo => vec![
            ("Database", quote! { db.clone() }),
            (
                "MongoStore",
                quote! { crate::model::ledger::MongoStore::new(db_client.clone(), db.clone()) },
            ),
        ],
    };

    let mut seen = vec![];
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                if let Some(type_ident) = type_path.path.get_ident() {
                    if let Some((_, expr)) = singletons.iter().find(|(ty, _)| type_ident == ty) {
                        if seen.contains(type_ident) {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_ident}`"),
                            ));
                        }
                        seen.push(type_ident.clone());
                        args.push(expr.clone());
                        continue;
                    }
                } else if backend == Backend::Mongo {
                    // Valid as the last path segment for any type is itself
                    let possible_collection = type_path.path.segments.last().unwrap();
                    if possible_collection.ident == "Coll" {
                        if let PathArguments::AngleBracketed(generics) =
                            &possible_collection.arguments
                        {
                            if let Some(GenericArgument::Type(Type::Path(type_path))) =
                                generics.args.first()
                            {
                                if let Some(type_ident) = type_path.path.get_ident() {
                                    args.push(quote! {
                                        crate::model::mongodb::Coll::<#type_ident>::from_db(&db)
                                    });
                                    continue;
                                }
                            }
                        }
                    }
                }
            }
        }

        let expected = match backend {
            Backend::Memory => {
                "Expected one of `client_ident: Client`, `store_ident: TestStore` or `oracle_ident: TestOracle`"
            }
            Backend::Mongo => {
                "Expected one of `db_ident: Database`, `store_ident: MongoStore` or `collection_ident: Coll<T>`"
            }
        };
        return Err(syn::Error::new(input.span(), expected));
    }

    Ok(args)
}
