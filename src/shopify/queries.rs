pub const COLLECTION_PRODUCTS_QUERY: &str = r#"
query CollectionProducts($id: ID!, $cursor: String, $first: Int!, $variantsFirst: Int!) {
  collection(id: $id) {
    id
    sortOrder
    products(first: $first, after: $cursor) {
      edges {
        cursor
        node {
          id
          variants(first: $variantsFirst) {
            nodes {
              price
              compareAtPrice
            }
          }
        }
      }
      pageInfo {
        hasNextPage
        endCursor
      }
    }
  }
}
"#;

pub const SET_MANUAL_MUTATION: &str = r#"
mutation SetManual($input: CollectionInput!) {
  collectionUpdate(input: $input) {
    collection {
      id
      sortOrder
    }
    userErrors {
      field
      message
    }
  }
}
"#;

pub const REORDER_MUTATION: &str = r#"
mutation Reorder($id: ID!, $moves: [MoveInput!]!) {
  collectionReorderProducts(id: $id, moves: $moves) {
    job {
      id
    }
    userErrors {
      field
      message
    }
  }
}
"#;
